use crate::config::EngineConfig;
use crate::core::error::{fail, logged};
use crate::core::{EngineError, EngineFault};
use crate::scanner::{Engine, ScanMode, SignatureEngine};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// 创建一个空引擎。引擎的释放即 `Drop`。
pub type EngineFactory = Arc<dyn Fn() -> Result<Box<dyn Engine>, EngineFault> + Send + Sync>;

pub(crate) type EngineSlot = Option<Arc<dyn Engine>>;

/// 引擎管理器与所有会话共享的生命周期状态。
///
/// 计数器和排空信号只在持有 `engine` 锁时写入，读取可以不加锁。
pub(crate) struct Lifecycle {
    engine: Mutex<EngineSlot>,
    pub(crate) active: AtomicUsize,
    pub(crate) drained: AtomicBool,
    pub(crate) drain_cv: Condvar,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            engine: Mutex::new(None),
            active: AtomicUsize::new(0),
            drained: AtomicBool::new(true),
            drain_cv: Condvar::new(),
        }
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, EngineSlot>, EngineError> {
        self.engine.lock().map_err(|_| logged(EngineError::LockFailure))
    }

    pub(crate) fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// 进程内唯一的引擎管理器，由调用方显式创建并以引用传递。
///
/// 生命周期锁只保护初始化、卸载以及会话的创建和销毁，扫描过程不持锁。
pub struct EngineManager {
    pub(crate) lifecycle: Arc<Lifecycle>,
    factory: EngineFactory,
    pub(crate) default_mode: ScanMode,
}

impl EngineManager {
    pub fn new(factory: EngineFactory) -> Self {
        Self {
            lifecycle: Arc::new(Lifecycle::new()),
            factory,
            default_mode: ScanMode::default(),
        }
    }

    /// 使用内置特征码引擎，扫描限制和默认模式取自配置
    pub fn from_config(config: &EngineConfig) -> Self {
        let limits = config.limits();
        let factory: EngineFactory = Arc::new(move || {
            Ok(Box::new(SignatureEngine::new(limits)) as Box<dyn Engine>)
        });

        Self::new(factory).with_default_mode(config.scan.default_mode)
    }

    /// 新会话的初始扫描模式
    pub fn with_default_mode(mut self, mode: ScanMode) -> Self {
        self.default_mode = mode;
        self
    }

    pub fn initialize<P: AsRef<Path>>(&self, definitions: P) -> Result<(), EngineError> {
        let path = definitions.as_ref();
        let mut slot = self.lifecycle.lock()?;

        if slot.is_some() {
            return fail(EngineError::AlreadyInitialized);
        }

        let mut engine = match (self.factory)() {
            Ok(engine) => engine,
            Err(fault) => {
                log::error!("无法创建新引擎: {}", fault);
                return fail(EngineError::AllocationFailure);
            }
        };

        // 失败时 engine 随作用域释放，管理器保持未初始化
        let loaded = engine.load(path).map_err(|f| logged(EngineError::Engine(f)))?;
        engine.compile().map_err(|f| logged(EngineError::Engine(f)))?;

        *slot = Some(Arc::from(engine));
        self.lifecycle.active.store(0, Ordering::SeqCst);
        self.lifecycle.drained.store(true, Ordering::SeqCst);
        self.lifecycle.drain_cv.notify_all();

        log::info!("引擎初始化完成，病毒库: {:?}，签名数量: {}", path, loaded);
        Ok(())
    }

    /// 一次性检查：仍有活动会话时立即返回 `Busy`，引擎保持不变
    pub fn try_uninitialize(&self) -> Result<(), EngineError> {
        let mut slot = self.lifecycle.lock()?;

        if slot.is_none() {
            return fail(EngineError::NotInitialized);
        }

        let active = self.lifecycle.active();
        if active > 0 {
            drop(slot);
            return fail(EngineError::Busy(active));
        }

        Self::release_engine(&mut slot);
        Ok(())
    }

    /// 等待所有会话销毁后卸载引擎。`timeout` 为 `None` 时无限等待。
    ///
    /// 等待期间锁会被释放，其他线程仍可创建会话；超时后仍有会话则返回 `Busy`。
    pub fn uninitialize_after_drain(&self, timeout: Option<Duration>) -> Result<(), EngineError> {
        let slot = self.lifecycle.lock()?;

        if slot.is_none() {
            return fail(EngineError::NotInitialized);
        }

        let lifecycle = &self.lifecycle;
        let mut slot = match timeout {
            Some(timeout) => {
                lifecycle
                    .drain_cv
                    .wait_timeout_while(slot, timeout, |_| lifecycle.active() > 0)
                    .map_err(|_| logged(EngineError::LockFailure))?
                    .0
            }
            None => lifecycle
                .drain_cv
                .wait_while(slot, |_| lifecycle.active() > 0)
                .map_err(|_| logged(EngineError::LockFailure))?,
        };

        // 等待期间可能已被其他线程卸载
        if slot.is_none() {
            return fail(EngineError::NotInitialized);
        }

        let active = lifecycle.active();
        if active > 0 {
            drop(slot);
            return fail(EngineError::Busy(active));
        }

        Self::release_engine(&mut slot);
        Ok(())
    }

    fn release_engine(slot: &mut EngineSlot) {
        if let Some(engine) = slot.take() {
            let refs = Arc::strong_count(&engine);
            if refs > 1 {
                log::warn!("引擎仍有 {} 个外部引用，将在引用释放后销毁", refs - 1);
            }
            drop(engine);
            log::info!("引擎已卸载");
        }
    }

    /// 锁不可用时返回 `LockFailure`，不当作未初始化
    pub fn is_initialized(&self) -> Result<bool, EngineError> {
        Ok(self.lifecycle.lock()?.is_some())
    }

    pub fn active_sessions(&self) -> usize {
        self.lifecycle.active()
    }

    /// 排空信号的快照，读取后随时可能失效
    pub fn is_drained(&self) -> bool {
        self.lifecycle.drained.load(Ordering::SeqCst)
    }

    /// 阻塞直到没有活动会话或超时，返回等待结束时的排空信号
    pub fn wait_drained(&self, timeout: Duration) -> Result<bool, EngineError> {
        let slot = self.lifecycle.lock()?;
        let lifecycle = &self.lifecycle;
        let (_slot, _) = lifecycle
            .drain_cv
            .wait_timeout_while(slot, timeout, |_| !lifecycle.drained.load(Ordering::SeqCst))
            .map_err(|_| logged(EngineError::LockFailure))?;

        Ok(lifecycle.drained.load(Ordering::SeqCst))
    }

    pub fn signature_count(&self) -> Result<usize, EngineError> {
        let slot = self.lifecycle.lock()?;
        match slot.as_ref() {
            Some(engine) => Ok(engine.signature_count()),
            None => fail(EngineError::NotInitialized),
        }
    }
}

impl Default for EngineManager {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}
