use std::process;
use virus_scanner_session::cli::Command;

fn main() {
    let command = Command::build();

    match command.execute() {
        Ok(false) => {
            log::info!("程序执行完成");
        }
        Ok(true) => {
            log::warn!("扫描发现威胁");
            process::exit(1);
        }
        Err(e) => {
            log::error!("执行错误: {:#}", e);
            eprintln!("错误: {:#}", e);
            process::exit(2);
        }
    }
}
