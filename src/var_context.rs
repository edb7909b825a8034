/*!
# Variable Context

Named input data for a model, exposed through the interface the sampling engine reads from:
existence checks, flattened value buffers, dimension vectors and separate integer and real
namespaces.

Arrays are accepted in their natural row-major layout and are stored flattened in column-major
(Fortran) order, which is the order the engine expects. The logical indices are preserved: the
element at `[i, j]` of a `2 × 3` array lands at position `i + 2 * j` of the buffer.

Integer data is also visible as real data; floating-point data is only visible as real data.

## Example

```rust
use ndarray::arr2;
use slimp::var_context::VariableContext;

let mut context = VariableContext::new();
context.set("N", 2_i32)?;
context.set("x", arr2(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]))?;

assert!(context.contains_integer("N"));
assert!(context.contains_real("N"));
assert_eq!(context.dims_real("x")?, &[2, 3]);
assert_eq!(context.values_real("x")?, &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
# Ok::<(), slimp::error::Error>(())
```
*/

use ndarray::{arr0, Array, ArrayD, Dimension, IxDyn};
use num_traits::ToPrimitive;
use std::collections::HashMap;
use std::fmt::Display;

use crate::error::{Error, Result};

/// Numeric element types accepted as input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
}

impl ElementKind {
    /// Parses a NumPy-style type tag such as `int32`, `uint8`, `float64`, `<f8` or `i4`.
    ///
    /// A leading byte-order character is ignored here; byte order is checked by
    /// [`ArrayData::from_le_bytes`].
    pub fn from_tag(tag: &str) -> Result<Self> {
        let bare = tag.trim_start_matches(['<', '>', '=', '|']);
        let kind = match bare {
            "int8" | "i1" => ElementKind::I8,
            "int16" | "i2" => ElementKind::I16,
            "int32" | "i4" => ElementKind::I32,
            "int64" | "i8" => ElementKind::I64,
            "uint8" | "u1" => ElementKind::U8,
            "uint16" | "u2" => ElementKind::U16,
            "uint32" | "u4" => ElementKind::U32,
            "uint64" | "u8" => ElementKind::U64,
            "float32" | "f4" => ElementKind::F32,
            "float64" | "f8" => ElementKind::F64,
            _ => return Err(Error::UnsupportedType(tag.to_string())),
        };
        Ok(kind)
    }

    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            ElementKind::I8 | ElementKind::U8 => 1,
            ElementKind::I16 | ElementKind::U16 => 2,
            ElementKind::I32 | ElementKind::U32 | ElementKind::F32 => 4,
            ElementKind::I64 | ElementKind::U64 | ElementKind::F64 => 8,
        }
    }

    pub fn is_integer(self) -> bool {
        !matches!(self, ElementKind::F32 | ElementKind::F64)
    }
}

/// A scalar or n-dimensional array of one of the supported element types.
///
/// Scalars are zero-dimensional arrays.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    I8(ArrayD<i8>),
    I16(ArrayD<i16>),
    I32(ArrayD<i32>),
    I64(ArrayD<i64>),
    U8(ArrayD<u8>),
    U16(ArrayD<u16>),
    U32(ArrayD<u32>),
    U64(ArrayD<u64>),
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
}

macro_rules! impl_array_data {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$t> for ArrayData {
                fn from(value: $t) -> Self {
                    ArrayData::$variant(arr0(value).into_dyn())
                }
            }

            impl From<Vec<$t>> for ArrayData {
                fn from(value: Vec<$t>) -> Self {
                    ArrayData::$variant(Array::from_vec(value).into_dyn())
                }
            }

            impl<D: Dimension> From<Array<$t, D>> for ArrayData {
                fn from(value: Array<$t, D>) -> Self {
                    ArrayData::$variant(value.into_dyn())
                }
            }
        )*

        impl ArrayData {
            /// Element type of the data.
            pub fn kind(&self) -> ElementKind {
                match self {
                    $(ArrayData::$variant(_) => ElementKind::$variant,)*
                }
            }

            /// Shape of the data, empty for a scalar.
            pub fn shape(&self) -> &[usize] {
                match self {
                    $(ArrayData::$variant(a) => a.shape(),)*
                }
            }

            /// Builds an array from a little-endian, row-major byte buffer described by a
            /// NumPy-style type tag. Big-endian tags (`>f8`) are rejected.
            pub fn from_le_bytes(tag: &str, shape: &[usize], bytes: &[u8]) -> Result<Self> {
                if tag.starts_with('>') {
                    return Err(Error::UnsupportedType(tag.to_string()));
                }
                let kind = ElementKind::from_tag(tag)?;
                let count: usize = shape.iter().product();
                if bytes.len() != count * kind.size() {
                    return Err(Error::InvalidShape(format!(
                        "{} bytes of {tag} cannot fill shape {shape:?}",
                        bytes.len()
                    )));
                }
                let invalid = |e: ndarray::ShapeError| Error::InvalidShape(e.to_string());
                let data = match kind {
                    $(
                        ElementKind::$variant => {
                            let values: Vec<$t> = bytes
                                .chunks_exact(kind.size())
                                .map(|chunk| {
                                    let mut buf = [0u8; std::mem::size_of::<$t>()];
                                    buf.copy_from_slice(chunk);
                                    <$t>::from_le_bytes(buf)
                                })
                                .collect();
                            ArrayData::$variant(
                                ArrayD::from_shape_vec(IxDyn(shape), values).map_err(invalid)?,
                            )
                        }
                    )*
                };
                Ok(data)
            }
        }
    };
}

impl_array_data!(
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
);

#[derive(Debug, Clone, PartialEq)]
struct Entry<T> {
    values: Vec<T>, // column-major
    dims: Vec<usize>,
}

/// Named integer and real data consumed by a model.
///
/// Built once per sampling call and then only read, possibly from several chains at once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableContext {
    integers: HashMap<String, Entry<i32>>,
    reals: HashMap<String, Entry<f64>>,
}

impl VariableContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a context from `(name, value)` pairs. Later pairs overwrite earlier ones.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<ArrayData>,
    {
        let mut context = Self::new();
        for (name, value) in pairs {
            context.set(name, value)?;
        }
        Ok(context)
    }

    /// Inserts or overwrites a variable.
    ///
    /// Integer data lands in both namespaces, floating-point data in the real namespace only.
    /// On a conversion error the previous value under `name` is kept.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<ArrayData>) -> Result<()> {
        let name = name.into();
        let (integer, real) = match value.into() {
            ArrayData::I8(a) => integer_entries(&name, &a)?,
            ArrayData::I16(a) => integer_entries(&name, &a)?,
            ArrayData::I32(a) => integer_entries(&name, &a)?,
            ArrayData::I64(a) => integer_entries(&name, &a)?,
            ArrayData::U8(a) => integer_entries(&name, &a)?,
            ArrayData::U16(a) => integer_entries(&name, &a)?,
            ArrayData::U32(a) => integer_entries(&name, &a)?,
            ArrayData::U64(a) => integer_entries(&name, &a)?,
            ArrayData::F32(a) => (None, real_entry(&a)),
            ArrayData::F64(a) => (None, real_entry(&a)),
        };
        match integer {
            Some(entry) => self.integers.insert(name.clone(), entry),
            None => self.integers.remove(&name),
        };
        self.reals.insert(name, real);
        Ok(())
    }

    pub fn contains_real(&self, name: &str) -> bool {
        self.reals.contains_key(name)
    }

    pub fn contains_integer(&self, name: &str) -> bool {
        self.integers.contains_key(name)
    }

    /// Column-major values of a real (or integer) variable.
    pub fn values_real(&self, name: &str) -> Result<&[f64]> {
        Ok(&self.real(name)?.values)
    }

    /// Column-major values of an integer variable.
    pub fn values_integer(&self, name: &str) -> Result<&[i32]> {
        Ok(&self.integer(name)?.values)
    }

    pub fn dims_real(&self, name: &str) -> Result<&[usize]> {
        Ok(&self.real(name)?.dims)
    }

    pub fn dims_integer(&self, name: &str) -> Result<&[usize]> {
        Ok(&self.integer(name)?.dims)
    }

    /// Names visible as real data, including integer variables.
    pub fn names_real(&self) -> Vec<&str> {
        self.reals.keys().map(String::as_str).collect()
    }

    pub fn names_integer(&self) -> Vec<&str> {
        self.integers.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.reals.is_empty()
    }

    /// Checks that `name` was provided with the declared dimensions.
    ///
    /// A missing variable is accepted only if the declared shape holds no element.
    pub fn validate_dims(&self, stage: &str, name: &str, expected: &[usize]) -> Result<()> {
        let entry = match self.reals.get(name) {
            Some(entry) => entry,
            None if expected.iter().product::<usize>() == 0 => return Ok(()),
            None => return Err(unknown("real", name)),
        };
        if entry.dims != expected {
            return Err(Error::DimensionMismatch {
                stage: stage.to_string(),
                name: name.to_string(),
                expected: expected.to_vec(),
                actual: entry.dims.clone(),
            });
        }
        Ok(())
    }

    fn real(&self, name: &str) -> Result<&Entry<f64>> {
        self.reals.get(name).ok_or_else(|| unknown("real", name))
    }

    fn integer(&self, name: &str) -> Result<&Entry<i32>> {
        self.integers.get(name).ok_or_else(|| unknown("integer", name))
    }
}

fn unknown(namespace: &'static str, name: &str) -> Error {
    Error::UnknownName {
        namespace,
        name: name.to_string(),
    }
}

/// Column-major integer entry plus its real view.
fn integer_entries<T>(name: &str, array: &ArrayD<T>) -> Result<(Option<Entry<i32>>, Entry<f64>)>
where
    T: ToPrimitive + Display,
{
    let values = array
        .t()
        .iter()
        .map(|v| {
            v.to_i32().ok_or_else(|| Error::IntegerOverflow {
                name: name.to_string(),
                value: v.to_string(),
            })
        })
        .collect::<Result<Vec<i32>>>()?;
    let dims = array.shape().to_vec();
    let reals = Entry {
        values: values.iter().map(|&v| f64::from(v)).collect(),
        dims: dims.clone(),
    };
    Ok((Some(Entry { values, dims }), reals))
}

fn real_entry<T: ToPrimitive>(array: &ArrayD<T>) -> Entry<f64> {
    Entry {
        values: array
            .t()
            .iter()
            .map(|v| v.to_f64().unwrap_or(f64::NAN))
            .collect(),
        dims: array.shape().to_vec(),
    }
}
