use crate::core::error::{fail, logged};
use crate::core::manager::{EngineManager, Lifecycle};
use crate::core::EngineError;
use crate::scanner::{Engine, ScanInfo, ScanMode};
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// 检测结果回调，调用方的上下文由闭包自行捕获
pub type ScanCallback = Arc<dyn Fn(&ScanInfo) + Send + Sync>;

/// 会话选项编号
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum OptionId {
    ScanMode = 0,
}

impl TryFrom<u32> for OptionId {
    type Error = EngineError;

    fn try_from(id: u32) -> Result<Self, Self::Error> {
        match id {
            0 => Ok(OptionId::ScanMode),
            other => Err(EngineError::InvalidOption(format!("不支持的选项: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionValue {
    ScanMode(ScanMode),
}

impl OptionValue {
    pub fn id(&self) -> OptionId {
        match self {
            OptionValue::ScanMode(_) => OptionId::ScanMode,
        }
    }
}

/// 一个调用方持有的扫描会话。
///
/// 创建时计数器加一，销毁（显式调用 [`EngineManager::destroy_session`] 或直接丢弃）时减一，
/// 两者各只发生一次。会话持有引擎引用，扫描时不需要生命周期锁。
pub struct Session {
    lifecycle: Arc<Lifecycle>,
    pub(crate) engine: Option<Arc<dyn Engine>>,
    pub(crate) mode: ScanMode,
    pub(crate) callback: Option<ScanCallback>,
    released: bool,
}

impl Session {
    fn new(lifecycle: Arc<Lifecycle>, engine: Arc<dyn Engine>, mode: ScanMode) -> Self {
        Self {
            lifecycle,
            engine: Some(engine),
            mode,
            callback: None,
            released: false,
        }
    }

    pub fn scan_mode(&self) -> ScanMode {
        self.mode
    }

    pub fn set_scan_mode(&mut self, mode: ScanMode) {
        self.mode = mode;
    }

    pub fn set_option(&mut self, value: OptionValue) -> Result<(), EngineError> {
        match value {
            OptionValue::ScanMode(mode) => self.mode = mode,
        }
        log::debug!("会话选项已设置: {:?}", value);
        Ok(())
    }

    pub fn get_option(&self, id: OptionId) -> OptionValue {
        match id {
            OptionId::ScanMode => OptionValue::ScanMode(self.mode),
        }
    }

    /// 原始字节形式的选项设置。大小或取值无效时返回 `InvalidOption`，已保存的值不变。
    pub fn set_option_bytes(&mut self, id: u32, value: &[u8]) -> Result<(), EngineError> {
        let id = OptionId::try_from(id).map_err(logged)?;

        match id {
            OptionId::ScanMode => {
                let raw: [u8; 4] = match value.try_into() {
                    Ok(raw) => raw,
                    Err(_) => {
                        return fail(EngineError::InvalidOption(format!(
                            "扫描模式长度错误: {}",
                            value.len()
                        )))
                    }
                };
                let tag = i32::from_ne_bytes(raw);
                let mode = match ScanMode::try_from(tag) {
                    Ok(mode) => mode,
                    Err(tag) => {
                        return fail(EngineError::InvalidOption(format!("无效的扫描模式: {}", tag)))
                    }
                };
                self.set_option(OptionValue::ScanMode(mode))
            }
        }
    }

    /// 把选项写入 `out`，返回写入的字节数
    pub fn get_option_bytes(&self, id: u32, out: &mut [u8]) -> Result<usize, EngineError> {
        let id = OptionId::try_from(id).map_err(logged)?;

        match self.get_option(id) {
            OptionValue::ScanMode(mode) => {
                let raw = mode.tag().to_ne_bytes();
                if out.len() < raw.len() {
                    return fail(EngineError::InvalidOption(format!(
                        "缓冲区长度不足: {}",
                        out.len()
                    )));
                }
                out[..raw.len()].copy_from_slice(&raw);
                Ok(raw.len())
            }
        }
    }

    pub fn set_scan_callback<F>(&mut self, callback: F)
    where
        F: Fn(&ScanInfo) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
    }

    pub fn clear_scan_callback(&mut self) {
        self.callback = None;
    }

    pub(crate) fn engine(&self) -> Result<&dyn Engine, EngineError> {
        match self.engine.as_deref() {
            Some(engine) => Ok(engine),
            None => fail(EngineError::NotInitialized),
        }
    }

    fn release(&mut self) -> Result<(), EngineError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.engine = None;

        let slot = self.lifecycle.lock()?;
        if slot.is_none() {
            return fail(EngineError::NotInitialized);
        }

        let remaining = self.lifecycle.active.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining == 0 {
            self.lifecycle.drained.store(true, Ordering::SeqCst);
            self.lifecycle.drain_cv.notify_all();
            log::debug!("所有会话已销毁");
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.release() {
                log::warn!("会话释放失败: {}", e);
            }
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("mode", &self.mode)
            .field("callback", &self.callback.is_some())
            .field("released", &self.released)
            .finish()
    }
}

impl EngineManager {
    pub fn create_session(&self) -> Result<Session, EngineError> {
        let slot = self.lifecycle.lock()?;

        let engine = match slot.as_ref() {
            Some(engine) => Arc::clone(engine),
            None => return fail(EngineError::NotInitialized),
        };

        let active = self.lifecycle.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.lifecycle.drained.store(false, Ordering::SeqCst);
        drop(slot);

        log::debug!("会话已创建，活动会话数: {}", active);
        Ok(Session::new(Arc::clone(&self.lifecycle), engine, self.default_mode))
    }

    pub fn destroy_session(&self, mut session: Session) -> Result<(), EngineError> {
        if !Arc::ptr_eq(&session.lifecycle, &self.lifecycle) {
            log::warn!("会话不属于当前引擎管理器");
        }
        session.release()
    }
}
