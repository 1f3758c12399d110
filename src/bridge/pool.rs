//! 模块池
//!
//! 按名称加载/卸载原生模块并维护引用计数。池是模块句柄的唯一所有者：
//! 同名模块只做一次系统级加载，引用计数归零时才真正卸载。

use super::loader::{
    IdentityLocator, ModuleLocator, NativeLibrary, NativeLoader, StaticModuleLoader,
};
use crate::abi::RawSymbol;
use crate::core::{BridgeError, BridgeResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// 每次系统级加载分配一个新的ID，卸载后重新加载的同名模块ID不同
pub type ModuleId = u64;

/// 模块句柄
///
/// 只是指向池中条目的标识，不持有库本身。模块卸载后句柄失效，
/// 通过它查找符号会得到[`BridgeError::StaleHandle`]。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleHandle {
    id: ModuleId,
    name: Rc<str>,
}

impl ModuleHandle {
    pub fn id(&self) -> ModuleId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

struct PooledModule {
    handle: ModuleHandle,
    path: PathBuf,
    refcount: usize,
    library: Box<dyn NativeLibrary>,
}

/// 卸载结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnloadOutcome {
    /// 引用计数减一，模块仍驻留
    Released { remaining: usize },
    /// 引用计数归零，模块已卸载
    Unloaded(ModuleId),
    /// 模块不在池中，什么都没做
    NotResident,
}

/// 池统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// 系统级加载次数
    pub os_loads: u64,
    /// 系统级卸载次数
    pub os_unloads: u64,
    /// 加载失败次数
    pub failed_loads: u64,
    /// 多余的卸载请求
    pub double_unloads: u64,
}

/// 模块池
pub struct ModulePool {
    loader: Box<dyn NativeLoader>,
    locator: Box<dyn ModuleLocator>,
    modules: HashMap<String, PooledModule>,
    next_id: ModuleId,
    stats: PoolStats,
}

impl ModulePool {
    pub fn new(loader: impl NativeLoader + 'static, locator: impl ModuleLocator + 'static) -> Self {
        Self {
            loader: Box::new(loader),
            locator: Box::new(locator),
            modules: HashMap::new(),
            next_id: 0,
            stats: PoolStats::default(),
        }
    }

    /// 只包含静态模块的池，模块名即注册名
    pub fn with_static(loader: StaticModuleLoader) -> Self {
        Self::new(loader, IdentityLocator)
    }

    /// 加载模块
    ///
    /// 已驻留时只增加引用计数并返回同一句柄，不做任何I/O。
    /// 失败时返回[`BridgeError::ModuleNotFound`]，调用方应禁用对应实例。
    pub fn load(&mut self, name: &str) -> BridgeResult<ModuleHandle> {
        if let Some(module) = self.modules.get_mut(name) {
            module.refcount += 1;
            tracing::debug!(
                target: "native_bridge::pool",
                "Module '{}' already resident, refcount -> {}",
                name,
                module.refcount
            );
            return Ok(module.handle.clone());
        }

        let path = match self.locator.locate(name) {
            Ok(path) => path,
            Err(reason) => return Err(self.load_failed(name, reason)),
        };

        tracing::info!(target: "native_bridge::pool", "Loading module '{}' from {}", name, path.display());
        let library = match self.loader.open(&path) {
            Ok(library) => library,
            Err(reason) => return Err(self.load_failed(name, reason)),
        };

        self.next_id += 1;
        let handle = ModuleHandle {
            id: self.next_id,
            name: Rc::from(name),
        };
        self.modules.insert(
            name.to_string(),
            PooledModule {
                handle: handle.clone(),
                path,
                refcount: 1,
                library,
            },
        );
        self.stats.os_loads += 1;
        tracing::info!(target: "native_bridge::pool", "Successfully loaded module '{}'", name);

        Ok(handle)
    }

    fn load_failed(&mut self, name: &str, reason: String) -> BridgeError {
        self.stats.failed_loads += 1;
        let err = BridgeError::ModuleNotFound {
            name: name.to_string(),
            reason,
        };
        tracing::error!(target: "native_bridge::pool", "{}", err);
        err
    }

    /// 释放一次引用
    ///
    /// 只有引用计数恰好归零时才真正卸载。对不在池中的模块是空操作，
    /// 记录为[`BridgeError::DoubleUnload`]警告。
    pub fn unload(&mut self, name: &str) -> UnloadOutcome {
        let Some(module) = self.modules.get_mut(name) else {
            self.stats.double_unloads += 1;
            tracing::warn!(
                target: "native_bridge::pool",
                "{}; ignoring",
                BridgeError::DoubleUnload(name.to_string())
            );
            return UnloadOutcome::NotResident;
        };

        module.refcount = module.refcount.saturating_sub(1);
        if module.refcount > 0 {
            tracing::debug!(
                target: "native_bridge::pool",
                "Released module '{}', refcount -> {}",
                name,
                module.refcount
            );
            return UnloadOutcome::Released {
                remaining: module.refcount,
            };
        }

        match self.modules.remove(name) {
            Some(module) => {
                let id = module.handle.id;
                self.close(name, module);
                UnloadOutcome::Unloaded(id)
            }
            None => UnloadOutcome::NotResident,
        }
    }

    fn close(&mut self, name: &str, module: PooledModule) {
        tracing::info!(
            target: "native_bridge::pool",
            "Releasing module '{}' ({})",
            name,
            module.path.display()
        );
        if let Err(e) = module.library.close() {
            tracing::error!(target: "native_bridge::pool", "Failed to unload module '{}': {}", name, e);
        }
        self.stats.os_unloads += 1;
    }

    /// 强制卸载所有模块
    ///
    /// 仍有引用的模块会被记录为泄漏。
    pub fn unload_all(&mut self) {
        if self.modules.is_empty() {
            return;
        }
        tracing::info!(
            target: "native_bridge::pool",
            "Total modules currently loaded: {}",
            self.modules.len()
        );
        let modules: Vec<_> = self.modules.drain().collect();
        for (name, module) in modules {
            tracing::warn!(
                target: "native_bridge::pool",
                "Module '{}' still has {} reference(s) at shutdown",
                name,
                module.refcount
            );
            self.close(&name, module);
        }
    }

    /// 句柄是否仍指向驻留中的模块
    pub fn is_live(&self, handle: &ModuleHandle) -> bool {
        self.modules
            .get(handle.name())
            .is_some_and(|m| m.handle.id == handle.id && m.refcount > 0)
    }

    /// 在句柄所指模块中查找符号
    pub fn symbol(&self, handle: &ModuleHandle, name: &str) -> BridgeResult<Option<RawSymbol>> {
        match self.modules.get(handle.name()) {
            Some(module) if module.handle.id == handle.id => Ok(module.library.symbol(name)),
            _ => Err(BridgeError::StaleHandle(handle.name().to_string())),
        }
    }

    pub fn refcount(&self, name: &str) -> usize {
        self.modules.get(name).map_or(0, |m| m.refcount)
    }

    pub fn is_resident(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn path_of(&self, name: &str) -> Option<&Path> {
        self.modules.get(name).map(|m| m.path.as_path())
    }

    /// 驻留模块名（已排序）
    pub fn resident_modules(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.modules.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }
}

impl Drop for ModulePool {
    fn drop(&mut self) {
        self.unload_all();
    }
}
