//! Thin wrappers so the crate compiles with intrinsic f32 math under `std`
//! and with `libm` everywhere else.

#[cfg(all(not(feature = "std"), not(feature = "libm")))]
compile_error!("builds without `std` need the `libm` feature for float math");

#[cfg(feature = "std")]
mod imp {
    #[inline(always)]
    pub fn sqrtf(v: f32) -> f32 {
        v.sqrt()
    }
    #[inline(always)]
    pub fn fabsf(v: f32) -> f32 {
        v.abs()
    }
    #[inline(always)]
    pub fn floorf(v: f32) -> f32 {
        v.floor()
    }
    #[inline(always)]
    pub fn ceilf(v: f32) -> f32 {
        v.ceil()
    }
    #[inline(always)]
    pub fn cosf(v: f32) -> f32 {
        v.cos()
    }
    #[inline(always)]
    pub fn sinf(v: f32) -> f32 {
        v.sin()
    }
    #[inline(always)]
    pub fn atan2f(y: f32, x: f32) -> f32 {
        y.atan2(x)
    }
    #[inline(always)]
    pub fn hypotf(x: f32, y: f32) -> f32 {
        x.hypot(y)
    }
}

#[cfg(not(feature = "std"))]
mod imp {
    pub use libm::{atan2f, ceilf, cosf, fabsf, floorf, hypotf, sinf, sqrtf};
}

pub use imp::*;

/// Branchless-ish float min; `f32::min` has NaN semantics we never need here.
#[inline(always)]
pub fn fminf(a: f32, b: f32) -> f32 {
    if a <= b {
        a
    } else {
        b
    }
}

#[inline(always)]
pub fn fmaxf(a: f32, b: f32) -> f32 {
    if a >= b {
        a
    } else {
        b
    }
}
