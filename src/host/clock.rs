//! 帧时钟
//!
//! 每帧由原始帧间隔推进，产生交给原生代码的[`ClockSnapshot`]。

use crate::abi::ClockSnapshot;
use crate::bridge::{FrameOutcome, MAX_FIXED_DELTA_TIME, MAX_TIME_SCALE, MIN_FIXED_DELTA_TIME};
use bevy_ecs::prelude::*;

/// 平滑帧间隔的指数系数
const SMOOTHING: f32 = 0.2;
/// 每帧最多追赶的固定步数，超出后固定步长时间直接对齐到当前时间
const MAX_FIXED_STEPS: u32 = 256;

#[derive(Resource, Clone, Debug)]
pub struct FrameClock {
    pub delta_time: f32,
    pub fixed_delta_time: f32,
    pub fixed_time: f32,
    pub fixed_unscaled_delta_time: f32,
    pub fixed_unscaled_time: f32,
    pub frame_count: u64,
    pub maximum_delta_time: f32,
    pub maximum_particle_delta_time: f32,
    pub real_time_since_startup: f32,
    pub smooth_delta_time: f32,
    pub time: f32,
    pub time_scale: f32,
    pub time_since_level_load: f32,
    pub unscaled_delta_time: f32,
    pub unscaled_time: f32,
}

impl Default for FrameClock {
    fn default() -> Self {
        Self {
            delta_time: 0.0,
            fixed_delta_time: 0.02,
            fixed_time: 0.0,
            fixed_unscaled_delta_time: 0.02,
            fixed_unscaled_time: 0.0,
            frame_count: 0,
            maximum_delta_time: 1.0 / 3.0,
            maximum_particle_delta_time: 0.03,
            real_time_since_startup: 0.0,
            smooth_delta_time: 0.0,
            time: 0.0,
            time_scale: 1.0,
            time_since_level_load: 0.0,
            unscaled_delta_time: 0.0,
            unscaled_time: 0.0,
        }
    }
}

impl FrameClock {
    /// 推进一帧
    ///
    /// 原始间隔先按`maximum_delta_time`截断再乘以`time_scale`；固定步长时间
    /// 以整步追赶到当前时间。负值或非有限值按0处理。
    pub fn advance(&mut self, raw_dt: f32) {
        let raw = if raw_dt.is_finite() { raw_dt.max(0.0) } else { 0.0 };
        let clamped = raw.min(self.maximum_delta_time);

        self.real_time_since_startup += raw;
        self.unscaled_delta_time = clamped;
        self.unscaled_time += clamped;
        self.delta_time = clamped * self.time_scale;
        self.time += self.delta_time;
        self.time_since_level_load += self.delta_time;
        self.frame_count += 1;

        self.smooth_delta_time = if self.frame_count == 1 {
            self.delta_time
        } else {
            self.smooth_delta_time + (self.delta_time - self.smooth_delta_time) * SMOOTHING
        };

        self.fixed_unscaled_delta_time = if self.time_scale > 0.0 {
            self.fixed_delta_time / self.time_scale
        } else {
            0.0
        };
        let mut steps = 0;
        while self.fixed_time + self.fixed_delta_time <= self.time {
            let next = self.fixed_time + self.fixed_delta_time;
            if steps == MAX_FIXED_STEPS || next == self.fixed_time {
                tracing::debug!(
                    target: "native_bridge::clock",
                    "Fixed time fell behind by {}s, snapping to current time",
                    self.time - self.fixed_time
                );
                self.fixed_time = self.time;
                break;
            }
            self.fixed_time = next;
            self.fixed_unscaled_time += self.fixed_unscaled_delta_time;
            steps += 1;
        }
    }

    pub fn snapshot(&self) -> ClockSnapshot {
        ClockSnapshot {
            delta_time: self.delta_time,
            fixed_delta_time: self.fixed_delta_time,
            fixed_time: self.fixed_time,
            fixed_unscaled_delta_time: self.fixed_unscaled_delta_time,
            fixed_unscaled_time: self.fixed_unscaled_time,
            frame_count: self.frame_count as f32,
            maximum_delta_time: self.maximum_delta_time,
            maximum_particle_delta_time: self.maximum_particle_delta_time,
            real_time_since_startup: self.real_time_since_startup,
            smooth_delta_time: self.smooth_delta_time,
            time: self.time,
            time_scale: self.time_scale,
            time_since_level_load: self.time_since_level_load,
            unscaled_delta_time: self.unscaled_delta_time,
            unscaled_time: self.unscaled_time,
        }
    }

    /// 应用原生代码回写的时钟字段
    pub fn apply(&mut self, outcome: &FrameOutcome) {
        if let Some(time_scale) = outcome.time_scale {
            self.time_scale = time_scale.clamp(0.0, MAX_TIME_SCALE);
        }
        if let Some(fixed_delta_time) = outcome.fixed_delta_time {
            self.fixed_delta_time = fixed_delta_time.clamp(MIN_FIXED_DELTA_TIME, MAX_FIXED_DELTA_TIME);
        }
    }
}
