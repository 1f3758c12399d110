//! 边界字符串编解码
//!
//! 边界上的字符串以`(指针, 长度)`表示，UTF-8编码，不带终止符。
//!
//! ## 所有权约定
//!
//! 被调用方总是复制，调用方不期望字符串在调用结束后仍然有效：
//!
//! - 宿主编码出的`TagString<'a>`借用宿主的缓冲区，只在产生它的那次调用期间有效。
//!   生命周期`'a`保证宿主侧在调用结束前不会释放或修改该缓冲区。
//! - 原生代码返回的`TagString`由宿主立即解码复制，之后不再访问原指针。

use crate::core::EncodingError;
use std::fmt;
use std::marker::PhantomData;

/// 边界字符串：`(ptr, len)`
#[repr(C)]
#[derive(Clone, Copy)]
pub struct TagString<'a> {
    ptr: *const u8,
    len: usize,
    _marker: PhantomData<&'a [u8]>,
}

impl TagString<'static> {
    /// 空字符串（空指针，长度0）
    pub const EMPTY: TagString<'static> = TagString {
        ptr: std::ptr::null(),
        len: 0,
        _marker: PhantomData,
    };
}

impl<'a> TagString<'a> {
    /// 借用`value`的字节，不复制
    pub fn borrowed(value: &'a str) -> Self {
        Self {
            ptr: value.as_ptr(),
            len: value.len(),
            _marker: PhantomData,
        }
    }

    /// 从原始指针构造
    ///
    /// # Safety
    ///
    /// `ptr`在`'a`期间必须可读`len`个字节，或者`len == 0`。
    pub unsafe fn from_raw_parts(ptr: *const u8, len: usize) -> Self {
        Self {
            ptr,
            len,
            _marker: PhantomData,
        }
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 读取原始字节
    ///
    /// # Safety
    ///
    /// 构造时的指针约定必须仍然成立。来自原生代码的`TagString`只能在
    /// 返回它的那次调用结束前读取。
    pub unsafe fn bytes(&self) -> Result<&'a [u8], EncodingError> {
        if self.len == 0 {
            return Ok(&[]);
        }
        if self.ptr.is_null() {
            return Err(EncodingError::NullPointer(self.len));
        }
        Ok(std::slice::from_raw_parts(self.ptr, self.len))
    }
}

impl Default for TagString<'_> {
    fn default() -> Self {
        TagString::EMPTY
    }
}

impl fmt::Debug for TagString<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TagString")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}

/// 宿主字符串与边界表示之间的转换
pub struct BoundaryStringCodec;

impl BoundaryStringCodec {
    /// 编码：产生的`TagString`只在借用`value`期间有效
    pub fn encode(value: &str) -> TagString<'_> {
        TagString::borrowed(value)
    }

    /// 解码：精确复制`len`个字节并按UTF-8校验，不假设终止符
    ///
    /// # Safety
    ///
    /// 同[`TagString::bytes`]。
    pub unsafe fn decode(tag: TagString<'_>) -> Result<String, EncodingError> {
        Self::decode_borrowed(tag).map(str::to_owned)
    }

    /// 解码但不复制，结果只在`'a`期间有效
    ///
    /// # Safety
    ///
    /// 同[`TagString::bytes`]。
    pub unsafe fn decode_borrowed<'a>(tag: TagString<'a>) -> Result<&'a str, EncodingError> {
        let bytes = tag.bytes()?;
        Ok(std::str::from_utf8(bytes)?)
    }

    /// 有损解码，用于日志消息
    ///
    /// # Safety
    ///
    /// 同[`TagString::bytes`]。
    pub unsafe fn decode_lossy(tag: TagString<'_>) -> String {
        match tag.bytes() {
            Ok(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            Err(e) => format!("<{}>", e),
        }
    }
}
