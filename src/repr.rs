use core::{mem::size_of, slice};

/// Plain-old-data element types that can be shared with a device as raw bytes.
///
/// # Safety
/// Implementors must have no padding, no invalid bit patterns and no
/// pointers, so that any byte sequence of the right length is a valid value.
pub unsafe trait DeviceRepr: Copy + 'static {
    /// The matching type name in the kernel language.
    fn as_c_type_str() -> &'static str;
}

macro_rules! device_repr {
    ($($t:ty => $c:literal),* $(,)?) => {
        $(
            unsafe impl DeviceRepr for $t {
                #[inline]
                fn as_c_type_str() -> &'static str {
                    $c
                }
            }
        )*
    };
}

device_repr! {
    f32 => "float",
    f64 => "double",
    i8 => "char",
    u8 => "uchar",
    i16 => "short",
    u16 => "ushort",
    i32 => "int",
    u32 => "uint",
    i64 => "long",
    u64 => "ulong",
}

#[cfg(feature = "half")]
device_repr! {
    half::f16 => "half",
}

#[cfg(feature = "half")]
unsafe impl DeviceRepr for half::bf16 {
    // there is no bf16 in OpenCL C, it is passed around as its bit pattern
    #[inline]
    fn as_c_type_str() -> &'static str {
        "ushort"
    }
}

/// Views a slice of plain data as bytes.
#[inline]
pub fn as_bytes<T: DeviceRepr>(data: &[T]) -> &[u8] {
    unsafe { slice::from_raw_parts(data.as_ptr().cast::<u8>(), size_of::<T>() * data.len()) }
}

/// Views a mutable slice of plain data as bytes.
#[inline]
pub fn as_bytes_mut<T: DeviceRepr>(data: &mut [T]) -> &mut [u8] {
    unsafe {
        slice::from_raw_parts_mut(data.as_mut_ptr().cast::<u8>(), size_of::<T>() * data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::{as_bytes, as_bytes_mut, DeviceRepr};

    #[test]
    fn test_byte_views() {
        let mut data = [1u32, 0x0102_0304];
        assert_eq!(as_bytes(&data).len(), 8);
        assert_eq!(&as_bytes(&data)[..4], &1u32.to_ne_bytes());

        as_bytes_mut(&mut data)[..4].copy_from_slice(&7u32.to_ne_bytes());
        assert_eq!(data[0], 7);
    }

    #[test]
    fn test_c_type_names() {
        assert_eq!(f32::as_c_type_str(), "float");
        assert_eq!(u8::as_c_type_str(), "uchar");
        assert_eq!(i64::as_c_type_str(), "long");
    }
}
