//! numpy arrays inside pickles
//!
//! Arrays reach a pickle in one of three shapes:
//! - `multiarray._reconstruct` followed by a `BUILD` state carrying shape,
//!   dtype, memory order and the raw buffer (protocols 2 to 4)
//! - `numeric._frombuffer(buffer, dtype, shape, order)` (protocol 5)
//! - a joblib `NumpyArrayWrapper` whose data follows it in the stream
//!
//! Only little- and big-endian numeric, bool, fixed-width string and
//! structured dtypes are decoded. Object arrays keep references to the
//! pickled elements.

use super::{malformed, Pickle, Ref, Value};
use modelgate_core::{Error, Result};

/// Element type of an array
#[derive(Debug, Clone, PartialEq)]
pub struct DType {
    /// numpy kind character: `b`, `i`, `u`, `f`, `U`, `S`, `V` or `O`
    pub kind: char,
    pub itemsize: usize,
    pub big_endian: bool,
    /// Named fields of a structured dtype
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub offset: usize,
    pub dtype: DType,
}

impl DType {
    pub fn is_object(&self) -> bool {
        self.kind == 'O'
    }

    /// Read a dtype from its pickled `numpy.dtype(typestr, align, copy)` call
    pub fn from_pickle(p: &Pickle, r: Ref) -> Result<Self> {
        match p.class_of(r) {
            Some((module, _)) if module == "numpy" || module.starts_with("numpy.") => {}
            _ => return Err(malformed("expected a numpy dtype")),
        }
        let typestr = p
            .args(r)
            .and_then(|args| args.first())
            .and_then(|t| p.as_str(*t))
            .ok_or_else(|| malformed("dtype without a type string"))?;

        let mut chars = typestr.chars();
        let kind = chars.next().ok_or_else(|| malformed("empty dtype string"))?;
        let width: usize = chars
            .as_str()
            .parse()
            .map_err(|_| malformed(format!("bad dtype '{}'", typestr)))?;
        let mut itemsize = if kind == 'U' { width * 4 } else { width };

        let mut big_endian = false;
        let mut fields = Vec::new();

        // (version, byteorder, subarray, names, fields, elsize, alignment, flags)
        if let Some(state) = p.state(r).and_then(|s| p.items(s)) {
            if let Some(order) = state.get(1).and_then(|o| p.as_str(*o)) {
                big_endian = order == ">";
            }
            if let Some(subarray) = state.get(2) {
                if !p.is_none(*subarray) {
                    return Err(Error::unsupported_format("numpy sub-array dtypes are not supported"));
                }
            }
            if let Some(Value::Dict(entries)) = state.get(4).map(|f| p.get(*f)) {
                for (name, spec) in entries {
                    let name = p
                        .as_str(*name)
                        .ok_or_else(|| malformed("non-string field name"))?;
                    let spec = p.items(*spec).ok_or_else(|| malformed("bad field spec"))?;
                    let (dtype, offset) = match spec {
                        [dtype, offset, ..] => (*dtype, *offset),
                        _ => return Err(malformed("bad field spec")),
                    };
                    fields.push(Field {
                        name: name.to_string(),
                        offset: p
                            .as_int(offset)
                            .and_then(|o| usize::try_from(o).ok())
                            .ok_or_else(|| malformed("bad field offset"))?,
                        dtype: DType::from_pickle(p, dtype)?,
                    });
                }
            }
            if let Some(elsize) = state.get(5).and_then(|e| p.as_int(*e)) {
                if elsize > 0 {
                    itemsize = elsize as usize;
                }
            }
        }

        Ok(Self {
            kind,
            itemsize,
            big_endian,
            fields,
        })
    }

    fn field(&self, name: &str) -> Result<&Field> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| malformed(format!("record has no field '{}'", name)))
    }
}

/// A single array element
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    /// C-ordered buffer
    Raw { dtype: DType, bytes: Vec<u8> },
    /// Pickled Python objects
    Objects(Vec<Ref>),
}

/// An n-dimensional array in C order
#[derive(Debug, Clone, PartialEq)]
pub struct NdArray {
    pub shape: Vec<usize>,
    pub data: ArrayData,
}

impl NdArray {
    /// Decode whichever array form `r` holds
    pub fn from_pickle(p: &Pickle, r: Ref) -> Result<Self> {
        if let Value::Array(array) = p.get(r) {
            return Ok(array.clone());
        }

        let (module, name) = p
            .class_of(r)
            .ok_or_else(|| malformed("expected a numpy array"))?;
        if !module.starts_with("numpy") {
            return Err(malformed(format!("expected a numpy array, found {}.{}", module, name)));
        }

        match name {
            "_reconstruct" => Self::from_reconstruct(p, r),
            "_frombuffer" => {
                let args = p.args(r).ok_or_else(|| malformed("_frombuffer without arguments"))?;
                let [buffer, dtype, shape, order] = args else {
                    return Err(malformed("_frombuffer expects four arguments"));
                };
                let bytes = p
                    .as_bytes(*buffer)
                    .ok_or_else(|| {
                        Error::unsupported_format("out-of-band pickle buffers are not supported")
                    })?
                    .to_vec();
                let fortran = p.as_str(*order) == Some("F");
                Self::raw(DType::from_pickle(p, *dtype)?, shape_of(p, *shape)?, fortran, bytes)
            }
            "scalar" => {
                let args = p.args(r).ok_or_else(|| malformed("scalar without arguments"))?;
                let [dtype, data] = args else {
                    return Err(malformed("scalar expects two arguments"));
                };
                let dtype = DType::from_pickle(p, *dtype)?;
                if dtype.is_object() {
                    return Ok(Self {
                        shape: Vec::new(),
                        data: ArrayData::Objects(vec![*data]),
                    });
                }
                let bytes = p
                    .as_bytes(*data)
                    .ok_or_else(|| malformed("scalar data is not bytes"))?
                    .to_vec();
                Self::raw(dtype, Vec::new(), false, bytes)
            }
            _ => Err(malformed(format!("expected a numpy array, found {}.{}", module, name))),
        }
    }

    fn from_reconstruct(p: &Pickle, r: Ref) -> Result<Self> {
        let state = p
            .state(r)
            .and_then(|s| p.items(s))
            .ok_or_else(|| malformed("ndarray without state"))?;
        // The version number leads in current numpy and is absent in old pickles
        let [shape, dtype, fortran, data] = match state {
            [_, rest @ ..] if rest.len() == 4 => [rest[0], rest[1], rest[2], rest[3]],
            [a, b, c, d] => [*a, *b, *c, *d],
            _ => return Err(malformed("unexpected ndarray state")),
        };

        let shape = shape_of(p, shape)?;
        let dtype = DType::from_pickle(p, dtype)?;
        let fortran = p.as_int(fortran).unwrap_or(0) != 0;

        match p.get(data) {
            Value::Bytes(bytes) => Self::raw(dtype, shape, fortran, bytes.clone()),
            Value::List(items) if dtype.is_object() => {
                if items.len() != shape.iter().product::<usize>() {
                    return Err(malformed(format!(
                        "object array has {} items, shape {:?}",
                        items.len(),
                        shape
                    )));
                }
                let mut items = items.clone();
                if fortran {
                    items = fortran_to_c(&shape, &items, 1);
                }
                Ok(Self {
                    shape,
                    data: ArrayData::Objects(items),
                })
            }
            _ => Err(malformed("unexpected ndarray data")),
        }
    }

    fn raw(dtype: DType, shape: Vec<usize>, fortran: bool, bytes: Vec<u8>) -> Result<Self> {
        let expected = shape
            .iter()
            .product::<usize>()
            .checked_mul(dtype.itemsize)
            .ok_or_else(|| malformed("array size overflows"))?;
        if bytes.len() != expected {
            return Err(malformed(format!(
                "array buffer has {} bytes, shape {:?} needs {}",
                bytes.len(),
                shape,
                expected
            )));
        }
        let bytes = if fortran && shape.len() > 1 {
            fortran_to_c(&shape, &bytes, dtype.itemsize)
        } else {
            bytes
        };
        Ok(Self {
            shape,
            data: ArrayData::Raw { dtype, bytes },
        })
    }

    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every element, in C order
    pub fn scalars(&self, p: &Pickle) -> Result<Vec<Scalar>> {
        match &self.data {
            ArrayData::Raw { dtype, bytes } => {
                if dtype.itemsize == 0 {
                    return Ok(Vec::new());
                }
                bytes
                    .chunks_exact(dtype.itemsize)
                    .map(|chunk| scalar(dtype, chunk))
                    .collect()
            }
            ArrayData::Objects(items) => items
                .iter()
                .map(|item| match p.get(*item) {
                    Value::Bool(v) => Ok(Scalar::Bool(*v)),
                    Value::Int(v) => Ok(Scalar::Int(*v)),
                    Value::Float(v) => Ok(Scalar::Float(*v)),
                    Value::Str(v) => Ok(Scalar::Text(v.clone())),
                    _ => match NdArray::from_pickle(p, *item) {
                        // numpy scalars inside object arrays
                        Ok(array) if array.shape.is_empty() => array
                            .scalars(p)?
                            .into_iter()
                            .next()
                            .ok_or_else(|| malformed("empty numpy scalar")),
                        _ => Err(Error::unsupported_format(
                            "object array holds values other than numbers and strings",
                        )),
                    },
                })
                .collect(),
        }
    }

    pub fn to_f64(&self, p: &Pickle) -> Result<Vec<f64>> {
        self.scalars(p)?
            .into_iter()
            .map(|s| match s {
                Scalar::Bool(v) => Ok(f64::from(u8::from(v))),
                Scalar::Int(v) => Ok(v as f64),
                Scalar::Float(v) => Ok(v),
                Scalar::Text(_) => Err(malformed("expected a numeric array")),
            })
            .collect()
    }

    pub fn to_i64(&self, p: &Pickle) -> Result<Vec<i64>> {
        self.scalars(p)?
            .into_iter()
            .map(|s| match s {
                Scalar::Bool(v) => Ok(i64::from(v)),
                Scalar::Int(v) => Ok(v),
                _ => Err(malformed("expected an integer array")),
            })
            .collect()
    }

    /// Copy one field out of a structured array
    pub fn column(&self, name: &str) -> Result<NdArray> {
        let ArrayData::Raw { dtype, bytes } = &self.data else {
            return Err(malformed("object arrays have no fields"));
        };
        let field = dtype.field(name)?;
        let width = field.dtype.itemsize;
        if field.offset + width > dtype.itemsize {
            return Err(malformed(format!("field '{}' overruns its record", name)));
        }

        let mut out = Vec::with_capacity(self.len() * width);
        for record in bytes.chunks_exact(dtype.itemsize) {
            out.extend_from_slice(&record[field.offset..field.offset + width]);
        }
        Ok(NdArray {
            shape: self.shape.clone(),
            data: ArrayData::Raw {
                dtype: field.dtype.clone(),
                bytes: out,
            },
        })
    }
}

fn shape_of(p: &Pickle, r: Ref) -> Result<Vec<usize>> {
    let dims = match p.get(r) {
        // 1-d shapes sometimes arrive as a bare int
        Value::Int(n) => return usize::try_from(*n).map(|n| vec![n]).map_err(|_| malformed("negative dimension")),
        _ => p.items(r).ok_or_else(|| malformed("array shape is not a tuple"))?,
    };
    dims.iter()
        .map(|d| {
            p.as_int(*d)
                .and_then(|d| usize::try_from(d).ok())
                .ok_or_else(|| malformed("bad array dimension"))
        })
        .collect()
}

/// Reorder column-major elements of `width` units each into row-major
fn fortran_to_c<T: Clone>(shape: &[usize], data: &[T], width: usize) -> Vec<T> {
    let count: usize = shape.iter().product();
    let mut out = Vec::with_capacity(data.len());
    let mut index = vec![0usize; shape.len()];
    for _ in 0..count {
        let mut offset = 0;
        let mut stride = 1;
        for (i, dim) in index.iter().zip(shape) {
            offset += i * stride;
            stride *= dim;
        }
        out.extend_from_slice(&data[offset * width..(offset + 1) * width]);

        // Advance the row-major index, last axis fastest
        for axis in (0..shape.len()).rev() {
            index[axis] += 1;
            if index[axis] < shape[axis] {
                break;
            }
            index[axis] = 0;
        }
    }
    out
}

fn scalar(dtype: &DType, chunk: &[u8]) -> Result<Scalar> {
    let mut buf = [0u8; 8];
    let fixed = |buf: &mut [u8; 8]| {
        let n = chunk.len().min(8);
        if dtype.big_endian {
            for (dst, src) in buf.iter_mut().zip(chunk[..n].iter().rev()) {
                *dst = *src;
            }
        } else {
            buf[..n].copy_from_slice(&chunk[..n]);
        }
    };

    match (dtype.kind, dtype.itemsize) {
        ('b', 1) => Ok(Scalar::Bool(chunk[0] != 0)),
        ('i', 1 | 2 | 4 | 8) => {
            fixed(&mut buf);
            // Sign-extend from the element width
            let shift = 64 - 8 * dtype.itemsize as u32;
            Ok(Scalar::Int((i64::from_le_bytes(buf) << shift) >> shift))
        }
        ('u', 1 | 2 | 4 | 8) => {
            fixed(&mut buf);
            i64::try_from(u64::from_le_bytes(buf))
                .map(Scalar::Int)
                .map_err(|_| Error::unsupported_format("uint64 value out of range"))
        }
        ('f', 4) => {
            fixed(&mut buf);
            Ok(Scalar::Float(f64::from(f32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]))))
        }
        ('f', 8) => {
            fixed(&mut buf);
            Ok(Scalar::Float(f64::from_le_bytes(buf)))
        }
        ('U', _) => {
            let text = chunk
                .chunks_exact(4)
                .map(|c| {
                    let c = [c[0], c[1], c[2], c[3]];
                    if dtype.big_endian {
                        u32::from_be_bytes(c)
                    } else {
                        u32::from_le_bytes(c)
                    }
                })
                .take_while(|&c| c != 0)
                .map(|c| char::from_u32(c).ok_or_else(|| malformed("invalid code point")))
                .collect::<Result<String>>()?;
            Ok(Scalar::Text(text))
        }
        ('S', _) => {
            let end = chunk.iter().position(|&b| b == 0).unwrap_or(chunk.len());
            Ok(Scalar::Text(String::from_utf8_lossy(&chunk[..end]).into_owned()))
        }
        (kind, size) => Err(Error::unsupported_format(format!(
            "numpy dtype {}{} is not supported",
            kind, size
        ))),
    }
}

/// Header joblib pickles in front of raw array data
pub(crate) struct WrapperHeader {
    pub dtype: DType,
    shape: Vec<usize>,
    fortran: bool,
    pub alignment: Option<usize>,
}

impl WrapperHeader {
    pub fn from_pickle(p: &Pickle, wrapper: Ref) -> Result<Self> {
        let dtype = p
            .attr(wrapper, "dtype")
            .ok_or_else(|| malformed("array wrapper without dtype"))?;
        let shape = p
            .attr(wrapper, "shape")
            .ok_or_else(|| malformed("array wrapper without shape"))?;
        let fortran = p
            .attr(wrapper, "order")
            .and_then(|o| p.as_str(o))
            .map_or(false, |o| o == "F");
        let alignment = p
            .attr(wrapper, "numpy_array_alignment_bytes")
            .and_then(|a| p.as_int(a))
            .and_then(|a| usize::try_from(a).ok());

        Ok(Self {
            dtype: DType::from_pickle(p, dtype)?,
            shape: shape_of(p, shape)?,
            fortran,
            alignment,
        })
    }

    pub fn count(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn into_array(self, data: Vec<u8>) -> Result<NdArray> {
        NdArray::raw(self.dtype, self.shape, self.fortran, data)
    }
}
