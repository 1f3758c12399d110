//! 函数解析器
//!
//! 把已加载模块中的命名符号绑定为带类型的可调用对象。签名由[`EntrySignature`]
//! 静态声明；缺失符号是否致命由调用方通过[`Requirement`]决定。

use super::pool::{ModuleHandle, ModuleId, ModulePool};
use crate::abi::{
    AbiVersionEntry, Destroy, EntryPoint, EntrySignature, FrameContext, HostApi, RawSymbol, Start,
    StatusCode, Update, ABI_VERSION, ABI_VERSION_SYMBOL,
};
use crate::core::{BridgeError, BridgeResult};
use std::collections::HashMap;

/// 缺失符号的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// 缺失时记录警告并返回`None`
    Optional,
    /// 缺失时返回`SymbolNotFound { required: true }`
    Required,
}

/// 绑定到模块的入口点
///
/// 生命周期受其模块句柄约束：模块卸载后调用会返回[`BridgeError::StaleHandle`]，
/// 不会触及已卸载的代码。
#[derive(Debug, Clone)]
pub struct FunctionBinding<F> {
    module: ModuleHandle,
    func: F,
}

impl<F: EntrySignature> FunctionBinding<F> {
    pub fn module(&self) -> &ModuleHandle {
        &self.module
    }

    pub fn entry(&self) -> EntryPoint {
        F::ENTRY
    }

    fn ensure_live(&self, pool: &ModulePool) -> BridgeResult<()> {
        if pool.is_live(&self.module) {
            Ok(())
        } else {
            Err(BridgeError::StaleHandle(self.module.name().to_string()))
        }
    }
}

impl FunctionBinding<Start> {
    pub fn invoke<'a>(
        &self,
        pool: &ModulePool,
        ctx: FrameContext<'a>,
        host: &HostApi,
    ) -> BridgeResult<FrameContext<'a>> {
        self.ensure_live(pool)?;
        // 模块驻留中，符号按契约签名解析
        Ok(unsafe { (self.func.0)(ctx, host) })
    }
}

impl FunctionBinding<Update> {
    pub fn invoke<'a>(
        &self,
        pool: &ModulePool,
        ctx: FrameContext<'a>,
        host: &HostApi,
    ) -> BridgeResult<FrameContext<'a>> {
        self.ensure_live(pool)?;
        Ok(unsafe { (self.func.0)(ctx, host) })
    }
}

impl FunctionBinding<Destroy> {
    pub fn invoke(
        &self,
        pool: &ModulePool,
        ctx: FrameContext<'_>,
        host: &HostApi,
    ) -> BridgeResult<StatusCode> {
        self.ensure_live(pool)?;
        Ok(unsafe { (self.func.0)(ctx, host) })
    }
}

/// 解析统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolverStats {
    pub lookups: u64,
    pub cache_hits: u64,
}

/// 函数解析器
///
/// 按`(模块ID, 符号名)`缓存解析结果（包括未找到），重复解析为O(1)。
pub struct FunctionResolver {
    symbols: HashMap<(ModuleId, &'static str), Option<RawSymbol>>,
    abi_versions: HashMap<ModuleId, Option<u32>>,
    strict_abi: bool,
    stats: ResolverStats,
}

crate::impl_default_and_new!(FunctionResolver {
    symbols: HashMap::new(),
    abi_versions: HashMap::new(),
    strict_abi: false,
    stats: ResolverStats::default(),
});

impl FunctionResolver {
    /// 严格模式下，未导出版本符号的模块会被拒绝
    pub fn with_strict_abi(mut self, strict: bool) -> Self {
        self.strict_abi = strict;
        self
    }

    /// 绑定入口点
    pub fn bind<F: EntrySignature>(
        &mut self,
        pool: &ModulePool,
        handle: &ModuleHandle,
        requirement: Requirement,
    ) -> BridgeResult<Option<FunctionBinding<F>>> {
        let symbol_name = F::ENTRY.symbol_name();
        match self.resolve(pool, handle, symbol_name)? {
            Some(raw) => {
                tracing::debug!(
                    target: "native_bridge::resolver",
                    "Bound '{}' from module '{}'",
                    symbol_name,
                    handle.name()
                );
                Ok(Some(FunctionBinding {
                    module: handle.clone(),
                    // 签名由F静态声明，版本握手在verify_abi中完成
                    func: unsafe { F::from_raw(raw) },
                }))
            }
            None => {
                let err = BridgeError::SymbolNotFound {
                    module: handle.name().to_string(),
                    symbol: symbol_name,
                    required: requirement == Requirement::Required,
                };
                match requirement {
                    Requirement::Optional => {
                        tracing::info!(
                            target: "native_bridge::resolver",
                            "{}; '{}' won't be run",
                            err,
                            symbol_name
                        );
                        Ok(None)
                    }
                    Requirement::Required => {
                        tracing::error!(target: "native_bridge::resolver", "{}", err);
                        Err(err)
                    }
                }
            }
        }
    }

    fn resolve(
        &mut self,
        pool: &ModulePool,
        handle: &ModuleHandle,
        symbol: &'static str,
    ) -> BridgeResult<Option<RawSymbol>> {
        self.stats.lookups += 1;
        let key = (handle.id(), symbol);
        if let Some(cached) = self.symbols.get(&key) {
            if pool.is_live(handle) {
                self.stats.cache_hits += 1;
                return Ok(*cached);
            }
            return Err(BridgeError::StaleHandle(handle.name().to_string()));
        }

        let resolved = pool.symbol(handle, symbol)?;
        self.symbols.insert(key, resolved);
        Ok(resolved)
    }

    /// 版本握手
    ///
    /// 模块导出`bridge_abi_version`时必须与[`ABI_VERSION`]一致；未导出时
    /// 非严格模式只发出警告。结果按模块缓存。
    pub fn verify_abi(&mut self, pool: &ModulePool, handle: &ModuleHandle) -> BridgeResult<()> {
        let found = match self.abi_versions.get(&handle.id()) {
            Some(found) => *found,
            None => {
                let found = self.resolve(pool, handle, ABI_VERSION_SYMBOL)?.map(|raw| {
                    // 版本符号签名固定为`extern "C" fn() -> u32`
                    let version: AbiVersionEntry = unsafe { std::mem::transmute(raw.as_ptr()) };
                    unsafe { version() }
                });
                if found.is_none() && !self.strict_abi {
                    tracing::warn!(
                        target: "native_bridge::resolver",
                        "Module '{}' does not export '{}', assuming ABI version {}",
                        handle.name(),
                        ABI_VERSION_SYMBOL,
                        ABI_VERSION
                    );
                }
                self.abi_versions.insert(handle.id(), found);
                found
            }
        };

        match found {
            Some(version) if version == ABI_VERSION => Ok(()),
            None if !self.strict_abi => Ok(()),
            found => Err(BridgeError::AbiMismatch {
                module: handle.name().to_string(),
                expected: ABI_VERSION,
                found,
            }),
        }
    }

    /// 丢弃某个模块的缓存，模块卸载后调用
    pub fn forget(&mut self, module: ModuleId) {
        self.symbols.retain(|(id, _), _| *id != module);
        self.abi_versions.remove(&module);
    }

    pub fn cached_symbols(&self) -> usize {
        self.symbols.len()
    }

    pub fn stats(&self) -> ResolverStats {
        self.stats
    }
}
