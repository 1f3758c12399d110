//! 宿主提供的加载原语
//!
//! - [`ModuleLocator`]：模块名到磁盘路径的解析
//! - [`NativeLoader`] / [`NativeLibrary`]：操作系统级的加载、符号查找和卸载
//!
//! [`DylibLoader`]基于libloading；[`StaticModuleLoader`]用于静态链接进宿主的模块，
//! 在没有动态加载器的平台以及测试中使用。

use crate::abi::{
    AbiVersionEntry, DestroyEntry, RawSymbol, StartEntry, UpdateEntry, ABI_VERSION_SYMBOL,
};
use libloading::{Library, Symbol};
use std::collections::HashMap;
use std::ffi::c_void;
use std::path::{Path, PathBuf};

/// 已加载的原生库
pub trait NativeLibrary {
    /// 查找导出符号
    fn symbol(&self, name: &str) -> Option<RawSymbol>;

    /// 卸载库
    fn close(self: Box<Self>) -> Result<(), String>;
}

/// 操作系统级加载原语
pub trait NativeLoader {
    fn open(&mut self, path: &Path) -> Result<Box<dyn NativeLibrary>, String>;
}

/// 模块路径解析
pub trait ModuleLocator {
    fn locate(&self, name: &str) -> Result<PathBuf, String>;
}

/// 基于libloading的动态库加载器
#[derive(Debug, Default, Clone, Copy)]
pub struct DylibLoader;

impl NativeLoader for DylibLoader {
    fn open(&mut self, path: &Path) -> Result<Box<dyn NativeLibrary>, String> {
        // 加载时会执行库的初始化代码，模块目录由宿主配置并被信任
        let library = unsafe { Library::new(path) }
            .map_err(|e| format!("Failed to load library {}: {}", path.display(), e))?;
        Ok(Box::new(DylibModule { library }))
    }
}

struct DylibModule {
    library: Library,
}

impl NativeLibrary for DylibModule {
    fn symbol(&self, name: &str) -> Option<RawSymbol> {
        // 只取地址，签名由调用方按契约解释
        let symbol: Symbol<*const c_void> = unsafe { self.library.get(name.as_bytes()) }.ok()?;
        RawSymbol::new(*symbol)
    }

    fn close(self: Box<Self>) -> Result<(), String> {
        self.library.close().map_err(|e| e.to_string())
    }
}

/// 按搜索路径查找模块文件
///
/// 不带扩展名的模块名会按平台规则补全（`libfoo.so`、`foo.dll`、`libfoo.dylib`）。
#[derive(Debug, Clone, Default)]
pub struct SearchPathLocator {
    search_paths: Vec<PathBuf>,
}

impl SearchPathLocator {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    fn file_name(name: &str) -> PathBuf {
        let path = Path::new(name);
        if path.extension().is_some() {
            path.to_path_buf()
        } else {
            PathBuf::from(libloading::library_filename(name))
        }
    }
}

impl ModuleLocator for SearchPathLocator {
    fn locate(&self, name: &str) -> Result<PathBuf, String> {
        let file = Self::file_name(name);
        if file.is_absolute() {
            return if file.is_file() {
                Ok(file)
            } else {
                Err(format!("{} does not exist", file.display()))
            };
        }

        let current = [PathBuf::from(".")];
        let dirs = if self.search_paths.is_empty() {
            &current[..]
        } else {
            &self.search_paths[..]
        };

        dirs.iter()
            .map(|dir| dir.join(&file))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| format!("{} not found in {:?}", file.display(), dirs))
    }
}

/// 直接把模块名作为路径
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityLocator;

impl ModuleLocator for IdentityLocator {
    fn locate(&self, name: &str) -> Result<PathBuf, String> {
        Ok(PathBuf::from(name))
    }
}

/// 静态链接模块的符号表
#[derive(Debug, Clone, Default)]
pub struct StaticModule {
    symbols: HashMap<String, RawSymbol>,
}

impl StaticModule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_start(self, entry: StartEntry) -> Self {
        self.with_symbol("start", entry as *const c_void)
    }

    pub fn with_update(self, entry: UpdateEntry) -> Self {
        self.with_symbol("update", entry as *const c_void)
    }

    pub fn with_destroy(self, entry: DestroyEntry) -> Self {
        self.with_symbol("destroy", entry as *const c_void)
    }

    pub fn with_abi_version(self, entry: AbiVersionEntry) -> Self {
        self.with_symbol(ABI_VERSION_SYMBOL, entry as *const c_void)
    }

    /// 空指针会被忽略
    pub fn with_symbol(mut self, name: &str, address: *const c_void) -> Self {
        if let Some(symbol) = RawSymbol::new(address) {
            self.symbols.insert(name.to_string(), symbol);
        }
        self
    }
}

impl NativeLibrary for StaticModule {
    fn symbol(&self, name: &str) -> Option<RawSymbol> {
        self.symbols.get(name).copied()
    }

    fn close(self: Box<Self>) -> Result<(), String> {
        Ok(())
    }
}

/// 静态模块加载器，以路径字符串为键
#[derive(Debug, Clone, Default)]
pub struct StaticModuleLoader {
    modules: HashMap<String, StaticModule>,
}

impl StaticModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(mut self, name: impl Into<String>, module: StaticModule) -> Self {
        self.register(name, module);
        self
    }

    pub fn register(&mut self, name: impl Into<String>, module: StaticModule) -> &mut Self {
        self.modules.insert(name.into(), module);
        self
    }
}

impl NativeLoader for StaticModuleLoader {
    fn open(&mut self, path: &Path) -> Result<Box<dyn NativeLibrary>, String> {
        let key = path.to_string_lossy();
        self.modules
            .get(key.as_ref())
            .cloned()
            .map(|module| Box::new(module) as Box<dyn NativeLibrary>)
            .ok_or_else(|| format!("No static module registered as '{}'", key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{FrameContext, HostApi, StatusCode};
    use tempfile::tempdir;

    unsafe extern "C" fn destroy(_ctx: FrameContext<'_>, _host: *const HostApi) -> StatusCode {
        StatusCode::OK
    }

    #[test]
    fn test_static_loader_resolves_registered_symbols() {
        let mut loader =
            StaticModuleLoader::new().with_module("mover", StaticModule::new().with_destroy(destroy));
        let library = loader.open(Path::new("mover")).unwrap();
        assert!(library.symbol("destroy").is_some());
        assert!(library.symbol("update").is_none());
        assert!(library.close().is_ok());
    }

    #[test]
    fn test_static_loader_unknown_module() {
        let mut loader = StaticModuleLoader::new();
        assert!(loader.open(Path::new("ghost")).is_err());
    }

    #[test]
    fn test_null_symbol_ignored() {
        let module = StaticModule::new().with_symbol("start", std::ptr::null());
        assert!(module.symbol("start").is_none());
    }

    #[test]
    fn test_search_path_locator_finds_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("mover.so");
        std::fs::write(&file, b"").unwrap();

        let locator = SearchPathLocator::new(vec![PathBuf::from("/nonexistent"), dir.path().into()]);
        assert_eq!(locator.locate("mover.so").unwrap(), file);
        assert!(locator.locate("missing.so").is_err());
    }

    #[test]
    fn test_search_path_locator_adds_platform_extension() {
        let dir = tempdir().unwrap();
        let file = dir.path().join(libloading::library_filename("mover"));
        std::fs::write(&file, b"").unwrap();

        let locator = SearchPathLocator::new(vec![dir.path().into()]);
        assert_eq!(locator.locate("mover").unwrap(), file);
    }

    #[test]
    fn test_dylib_loader_reports_missing_file() {
        let mut loader = DylibLoader;
        let err = loader.open(Path::new("/definitely/not/here.so")).err().unwrap();
        assert!(err.contains("Failed to load library"));
    }
}
