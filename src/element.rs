//! Element types storable in an accessor.

use num_complex::Complex;

/// A primitive element type.
///
/// `bytemuck::Pod` carries the size and pointer-cast rules used by the raw-memory
/// path and makes zeroed allocation a valid initial state; `num_traits::Zero`
/// supplies the fill value of materialize-on-demand storage.
pub trait Element:
    Copy + bytemuck::Pod + num_traits::Zero + std::fmt::Debug + Send + Sync + 'static
{
}

macro_rules! impl_element {
    ($($t:ty),*) => {
        $(impl Element for $t {})*
    };
}

impl_element!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64);

impl Element for Complex<f32> {}
impl Element for Complex<f64> {}
