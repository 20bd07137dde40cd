//! Fixed-layout values stored as table rows
//!
//! A [`Row`] has a constant little-endian encoding of [`Row::LEN`] bytes.
//! The helpers here read and write such values through a [`Table`] whose
//! `rowlen` equals that length; any other row length is rejected.
//!
//! ```text
//! (u32, [u16; 2], i64)  ->  │ u32 LE │ u16 LE │ u16 LE │ i64 LE │   16 bytes
//! ```

use crate::table::Table;
use byteorder::{ByteOrder, LittleEndian};
use reliant_core::{Error, Result};
use tracing::warn;

/// Value with a fixed little-endian row encoding
pub trait Row: Sized {
    /// Encoded length in bytes
    const LEN: usize;

    /// Encode into `buf`, which is exactly `LEN` bytes.
    fn write_le(&self, buf: &mut [u8]);

    /// Decode from `buf`, which is exactly `LEN` bytes.
    fn read_le(buf: &[u8]) -> Self;
}

macro_rules! impl_row_int {
    ($($t:ty => $write:ident, $read:ident;)*) => {$(
        impl Row for $t {
            const LEN: usize = std::mem::size_of::<$t>();

            fn write_le(&self, buf: &mut [u8]) {
                LittleEndian::$write(buf, *self)
            }

            fn read_le(buf: &[u8]) -> Self {
                LittleEndian::$read(buf)
            }
        }
    )*};
}

impl_row_int! {
    u16 => write_u16, read_u16;
    i16 => write_i16, read_i16;
    u32 => write_u32, read_u32;
    i32 => write_i32, read_i32;
    u64 => write_u64, read_u64;
    i64 => write_i64, read_i64;
    f32 => write_f32, read_f32;
    f64 => write_f64, read_f64;
}

impl Row for u8 {
    const LEN: usize = 1;

    fn write_le(&self, buf: &mut [u8]) {
        buf[0] = *self;
    }

    fn read_le(buf: &[u8]) -> Self {
        buf[0]
    }
}

impl Row for i8 {
    const LEN: usize = 1;

    fn write_le(&self, buf: &mut [u8]) {
        buf[0] = *self as u8;
    }

    fn read_le(buf: &[u8]) -> Self {
        buf[0] as i8
    }
}

impl<T: Row, const N: usize> Row for [T; N] {
    const LEN: usize = T::LEN * N;

    fn write_le(&self, buf: &mut [u8]) {
        for (v, chunk) in self.iter().zip(buf.chunks_exact_mut(T::LEN)) {
            v.write_le(chunk);
        }
    }

    fn read_le(buf: &[u8]) -> Self {
        std::array::from_fn(|i| T::read_le(&buf[i * T::LEN..(i + 1) * T::LEN]))
    }
}

macro_rules! impl_row_tuple {
    ($($name:ident . $idx:tt),+) => {
        impl<$($name: Row),+> Row for ($($name,)+) {
            const LEN: usize = 0 $(+ $name::LEN)+;

            #[allow(unused_assignments)]
            fn write_le(&self, buf: &mut [u8]) {
                let mut off = 0;
                $(
                    self.$idx.write_le(&mut buf[off..off + $name::LEN]);
                    off += $name::LEN;
                )+
            }

            #[allow(unused_assignments)]
            fn read_le(buf: &[u8]) -> Self {
                let mut off = 0;
                ($({
                    let v = $name::read_le(&buf[off..off + $name::LEN]);
                    off += $name::LEN;
                    v
                },)+)
            }
        }
    };
}

impl_row_tuple!(A.0, B.1);
impl_row_tuple!(A.0, B.1, C.2);
impl_row_tuple!(A.0, B.1, C.2, D.3);

fn check_row_len<T: Row>(op: &str, table: &Table) -> Result<()> {
    if T::LEN != table.row_len() {
        warn!(op, len = T::LEN, rowlen = table.row_len(), "Typed row length mismatch");
        return Err(Error::InvalidArgs(format!(
            "{}: value encodes to {} bytes, rowlen is {}",
            op,
            T::LEN,
            table.row_len()
        )));
    }
    Ok(())
}

/// Write `value` as row `row`.
pub fn write_row_as<T: Row>(table: &Table, row: u64, value: &T) -> Result<()> {
    check_row_len::<T>("write_row_as", table)?;
    let mut buf = vec![0u8; T::LEN];
    value.write_le(&mut buf);
    table.write_row(row, &buf)
}

/// Write `values` as consecutive rows starting at `row`.
pub fn write_rows_as<T: Row>(table: &Table, row: u64, values: &[T]) -> Result<()> {
    check_row_len::<T>("write_rows_as", table)?;
    let mut buf = vec![0u8; T::LEN * values.len()];
    for (v, chunk) in values.iter().zip(buf.chunks_exact_mut(T::LEN)) {
        v.write_le(chunk);
    }
    table.write_rows(row, &buf)
}

/// Read row `row` as a `T`.
pub fn read_row_as<T: Row>(table: &Table, row: u64) -> Result<T> {
    check_row_len::<T>("read_row_as", table)?;
    let mut buf = vec![0u8; T::LEN];
    table.read_row(row, &mut buf)?;
    Ok(T::read_le(&buf))
}

/// Read `n` consecutive rows starting at `row`.
pub fn read_rows_as<T: Row>(table: &Table, row: u64, n: usize) -> Result<Vec<T>> {
    check_row_len::<T>("read_rows_as", table)?;
    let mut buf = vec![0u8; T::LEN * n];
    table.read_rows(row, &mut buf)?;
    Ok(buf.chunks_exact(T::LEN).map(T::read_le).collect())
}
