//! 边界数学类型
//!
//! 与原生模块交换的向量、四元数和变换。布局固定为顺序排列的`f32`，
//! 不能直接使用glam类型（`Quat`在SIMD后端下按16字节对齐）。

use bytemuck::{Pod, Zeroable};
use glam::{EulerRot, Quat, Vec3};
use std::ops::{Mul, MulAssign};

/// 三维向量
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// 平移：`a + b`
    pub fn translate(a: Self, b: Self) -> Self {
        (Vec3::from(a) + Vec3::from(b)).into()
    }

    /// 在`start`和`end`之间按`t`线性插值
    pub fn lerp(start: Self, end: Self, t: f32) -> Self {
        Vec3::from(start).lerp(Vec3::from(end), t).into()
    }
}

impl From<Vec3> for Vector3 {
    fn from(v: Vec3) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

impl From<Vector3> for Vec3 {
    fn from(v: Vector3) -> Self {
        Vec3::new(v.x, v.y, v.z)
    }
}

/// 旋转四元数
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Quaternion {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Quaternion {
    pub const IDENTITY: Self = Self::new(0.0, 0.0, 0.0, 1.0);

    pub const fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    /// 从欧拉角（弧度，XYZ顺序）创建
    pub fn from_euler(x: f32, y: f32, z: f32) -> Self {
        Quat::from_euler(EulerRot::XYZ, x, y, z).into()
    }
}

impl From<Quat> for Quaternion {
    fn from(q: Quat) -> Self {
        Self::new(q.x, q.y, q.z, q.w)
    }
}

impl From<Quaternion> for Quat {
    fn from(q: Quaternion) -> Self {
        Quat::from_xyzw(q.x, q.y, q.z, q.w)
    }
}

impl Mul for Quaternion {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        (Quat::from(self) * Quat::from(rhs)).into()
    }
}

impl MulAssign for Quaternion {
    fn mul_assign(&mut self, rhs: Self) {
        *self = *self * rhs;
    }
}

/// 位置 + 旋转
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct TransformData {
    pub position: Vector3,
    pub rotation: Quaternion,
}

impl TransformData {
    pub const fn new(position: Vector3, rotation: Quaternion) -> Self {
        Self { position, rotation }
    }
}
