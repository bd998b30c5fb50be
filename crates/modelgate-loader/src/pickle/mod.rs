//! Pickle object graphs
//!
//! `serde-pickle` handles pickles of plain data. Pickles of Python objects
//! (scikit-learn estimators, numpy arrays) instead record how to rebuild the
//! object: a global naming a class or function, the arguments it is called
//! with, and the state later applied by `BUILD`. This module runs the pickle
//! opcodes without calling anything and keeps that recipe as a graph of
//! [`Value`]s for the estimator decoders to read.
//!
//! joblib writes numpy array data outside the pickle opcodes, right after
//! each `NumpyArrayWrapper`; the machine reads it inline as joblib does.

pub mod numpy;

use modelgate_core::{Error, Result};
use std::collections::HashMap;

pub use numpy::{DType, NdArray};

/// Index of a value in a [`Pickle`]
pub type Ref = usize;

/// Nested pickles joblib may embed for object arrays
const MAX_NESTING: usize = 4;

/// A value reconstructed from pickle opcodes
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    /// Integer wider than 64 bits
    BigInt,
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Ref>),
    Tuple(Vec<Ref>),
    Dict(Vec<(Ref, Ref)>),
    Set(Vec<Ref>),
    /// `module.name` reference to a class or function
    Global { module: String, name: String },
    /// Result of calling `callable(*args)`, with the state set by `BUILD`
    Object {
        callable: Ref,
        args: Ref,
        state: Option<Ref>,
    },
    /// Array whose data joblib stored inline
    Array(NdArray),
}

/// A decoded pickle
#[derive(Debug, Clone)]
pub struct Pickle {
    values: Vec<Value>,
    root: Ref,
}

impl Pickle {
    /// Run the opcodes of a complete pickle
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut machine = Machine {
            input: bytes,
            pos: 0,
            values: Vec::new(),
        };
        let root = machine.run(0)?;
        Ok(Self {
            values: machine.values,
            root,
        })
    }

    pub fn root(&self) -> Ref {
        self.root
    }

    pub fn get(&self, r: Ref) -> &Value {
        // Refs only come from this pickle
        &self.values[r]
    }

    /// `(module, name)` of the global called to build `r`
    pub fn class_of(&self, r: Ref) -> Option<(&str, &str)> {
        match self.get(r) {
            Value::Object { callable, .. } => self.global(*callable),
            _ => None,
        }
    }

    /// `(module, name)` if `r` is a global
    pub fn global(&self, r: Ref) -> Option<(&str, &str)> {
        match self.get(r) {
            Value::Global { module, name } => Some((module, name)),
            _ => None,
        }
    }

    /// Entry `key` of the state dict an object was built with
    pub fn attr(&self, obj: Ref, key: &str) -> Option<Ref> {
        let state = match self.get(obj) {
            Value::Object { state: Some(state), .. } => *state,
            _ => return None,
        };
        // Objects with slots pickle their state as (dict, slots)
        let dict = match self.get(state) {
            Value::Tuple(items) => *items.first()?,
            _ => state,
        };
        self.dict_get(dict, key)
    }

    /// Entry `key` of a dict with string keys
    pub fn dict_get(&self, dict: Ref, key: &str) -> Option<Ref> {
        match self.get(dict) {
            Value::Dict(entries) => entries
                .iter()
                .find(|(k, _)| self.as_str(*k) == Some(key))
                .map(|(_, v)| *v),
            _ => None,
        }
    }

    /// Arguments of a call
    pub fn args(&self, obj: Ref) -> Option<&[Ref]> {
        match self.get(obj) {
            Value::Object { args, .. } => self.items(*args),
            _ => None,
        }
    }

    /// State set on an object by `BUILD`
    pub fn state(&self, obj: Ref) -> Option<Ref> {
        match self.get(obj) {
            Value::Object { state, .. } => *state,
            _ => None,
        }
    }

    /// Elements of a list or tuple
    pub fn items(&self, r: Ref) -> Option<&[Ref]> {
        match self.get(r) {
            Value::List(items) | Value::Tuple(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self, r: Ref) -> Option<&str> {
        match self.get(r) {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self, r: Ref) -> Option<i64> {
        match self.get(r) {
            Value::Int(v) => Some(*v),
            Value::Bool(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn as_float(&self, r: Ref) -> Option<f64> {
        match self.get(r) {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            Value::Bool(v) => Some(f64::from(u8::from(*v))),
            _ => None,
        }
    }

    pub fn as_bytes(&self, r: Ref) -> Option<&[u8]> {
        match self.get(r) {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn is_none(&self, r: Ref) -> bool {
        matches!(self.get(r), Value::None)
    }
}

mod op {
    pub const MARK: u8 = b'(';
    pub const STOP: u8 = b'.';
    pub const POP: u8 = b'0';
    pub const POP_MARK: u8 = b'1';
    pub const DUP: u8 = b'2';
    pub const FLOAT: u8 = b'F';
    pub const INT: u8 = b'I';
    pub const BININT: u8 = b'J';
    pub const BININT1: u8 = b'K';
    pub const LONG: u8 = b'L';
    pub const BININT2: u8 = b'M';
    pub const NONE: u8 = b'N';
    pub const REDUCE: u8 = b'R';
    pub const BINSTRING: u8 = b'T';
    pub const SHORT_BINSTRING: u8 = b'U';
    pub const UNICODE: u8 = b'V';
    pub const BINUNICODE: u8 = b'X';
    pub const APPEND: u8 = b'a';
    pub const BUILD: u8 = b'b';
    pub const GLOBAL: u8 = b'c';
    pub const DICT: u8 = b'd';
    pub const EMPTY_DICT: u8 = b'}';
    pub const APPENDS: u8 = b'e';
    pub const GET: u8 = b'g';
    pub const BINGET: u8 = b'h';
    pub const LONG_BINGET: u8 = b'j';
    pub const LIST: u8 = b'l';
    pub const EMPTY_LIST: u8 = b']';
    pub const PUT: u8 = b'p';
    pub const BINPUT: u8 = b'q';
    pub const LONG_BINPUT: u8 = b'r';
    pub const SETITEM: u8 = b's';
    pub const TUPLE: u8 = b't';
    pub const EMPTY_TUPLE: u8 = b')';
    pub const SETITEMS: u8 = b'u';
    pub const BINFLOAT: u8 = b'G';
    pub const PROTO: u8 = 0x80;
    pub const NEWOBJ: u8 = 0x81;
    pub const TUPLE1: u8 = 0x85;
    pub const TUPLE2: u8 = 0x86;
    pub const TUPLE3: u8 = 0x87;
    pub const NEWTRUE: u8 = 0x88;
    pub const NEWFALSE: u8 = 0x89;
    pub const LONG1: u8 = 0x8a;
    pub const LONG4: u8 = 0x8b;
    pub const BINBYTES: u8 = b'B';
    pub const SHORT_BINBYTES: u8 = b'C';
    pub const SHORT_BINUNICODE: u8 = 0x8c;
    pub const BINUNICODE8: u8 = 0x8d;
    pub const BINBYTES8: u8 = 0x8e;
    pub const EMPTY_SET: u8 = 0x8f;
    pub const ADDITEMS: u8 = 0x90;
    pub const FROZENSET: u8 = 0x91;
    pub const NEWOBJ_EX: u8 = 0x92;
    pub const STACK_GLOBAL: u8 = 0x93;
    pub const MEMOIZE: u8 = 0x94;
    pub const FRAME: u8 = 0x95;
    pub const BYTEARRAY8: u8 = 0x96;
}

fn malformed(msg: impl std::fmt::Display) -> Error {
    Error::load(format!("malformed pickle: {}", msg))
}

struct Machine<'a> {
    input: &'a [u8],
    pos: usize,
    values: Vec<Value>,
}

impl<'a> Machine<'a> {
    fn alloc(&mut self, value: Value) -> Ref {
        self.values.push(value);
        self.values.len() - 1
    }

    /// Read `n` raw bytes from the stream
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.input.len())
            .ok_or_else(|| malformed(format!("truncated at byte {}", self.pos)))?;
        let input: &'a [u8] = self.input;
        self.pos = end;
        Ok(&input[end - n..end])
    }

    fn byte(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<usize> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]) as usize)
    }

    fn u32(&mut self) -> Result<usize> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize)
    }

    fn u64(&mut self) -> Result<usize> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        usize::try_from(u64::from_le_bytes(buf)).map_err(|_| malformed("length overflows"))
    }

    fn line(&mut self) -> Result<&'a str> {
        let input: &'a [u8] = self.input;
        let len = input[self.pos..]
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| malformed("unterminated line"))?;
        let line = self.take(len)?;
        self.pos += 1;
        std::str::from_utf8(line).map_err(|_| malformed("non-UTF-8 text line"))
    }

    fn utf8(&mut self, len: usize) -> Result<String> {
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| malformed("invalid UTF-8 string"))
    }

    /// Run opcodes up to `STOP`, returning the value left on the stack
    fn run(&mut self, depth: usize) -> Result<Ref> {
        if depth > MAX_NESTING {
            return Err(malformed("too many nested pickles"));
        }

        let mut stack: Vec<Ref> = Vec::new();
        let mut marks: Vec<usize> = Vec::new();
        let mut memo: HashMap<usize, Ref> = HashMap::new();

        macro_rules! pop {
            () => {
                stack.pop().ok_or_else(|| malformed("stack underflow"))?
            };
        }
        macro_rules! top {
            () => {
                *stack.last().ok_or_else(|| malformed("stack underflow"))?
            };
        }
        macro_rules! pop_mark {
            () => {{
                let mark = marks.pop().ok_or_else(|| malformed("missing mark"))?;
                if mark > stack.len() {
                    return Err(malformed("mark past end of stack"));
                }
                stack.split_off(mark)
            }};
        }

        loop {
            let code = self.byte()?;
            match code {
                op::PROTO => {
                    let version = self.byte()?;
                    if version > 5 {
                        return Err(Error::unsupported_format(format!(
                            "pickle protocol {} is not supported",
                            version
                        )));
                    }
                }
                op::FRAME => {
                    // Frames only group opcodes for buffered reads
                    self.take(8)?;
                }
                op::STOP => return Ok(pop!()),
                op::MARK => marks.push(stack.len()),
                op::POP => {
                    if marks.last() == Some(&stack.len()) {
                        marks.pop();
                    } else {
                        pop!();
                    }
                }
                op::POP_MARK => {
                    pop_mark!();
                }
                op::DUP => {
                    let r = top!();
                    stack.push(r);
                }

                op::NONE => stack.push(self.alloc(Value::None)),
                op::NEWTRUE => stack.push(self.alloc(Value::Bool(true))),
                op::NEWFALSE => stack.push(self.alloc(Value::Bool(false))),
                op::BININT => {
                    let b = self.take(4)?;
                    let v = i32::from_le_bytes([b[0], b[1], b[2], b[3]]);
                    stack.push(self.alloc(Value::Int(i64::from(v))));
                }
                op::BININT1 => {
                    let v = self.byte()?;
                    stack.push(self.alloc(Value::Int(i64::from(v))));
                }
                op::BININT2 => {
                    let v = self.u16()?;
                    stack.push(self.alloc(Value::Int(v as i64)));
                }
                op::LONG1 => {
                    let n = self.byte()? as usize;
                    let bytes = self.take(n)?;
                    stack.push(self.alloc(long(bytes)));
                }
                op::LONG4 => {
                    let n = self.u32()?;
                    let bytes = self.take(n)?;
                    stack.push(self.alloc(long(bytes)));
                }
                op::INT => {
                    let line = self.line()?;
                    let value = match line {
                        "00" => Value::Bool(false),
                        "01" => Value::Bool(true),
                        _ => Value::Int(
                            line.parse()
                                .map_err(|_| malformed(format!("bad INT '{}'", line)))?,
                        ),
                    };
                    stack.push(self.alloc(value));
                }
                op::LONG => {
                    let line = self.line()?;
                    let digits = line.trim_end_matches('L');
                    let value = digits.parse().map(Value::Int).unwrap_or(Value::BigInt);
                    stack.push(self.alloc(value));
                }
                op::FLOAT => {
                    let line = self.line()?;
                    let v = line
                        .parse()
                        .map_err(|_| malformed(format!("bad FLOAT '{}'", line)))?;
                    stack.push(self.alloc(Value::Float(v)));
                }
                op::BINFLOAT => {
                    let mut buf = [0u8; 8];
                    buf.copy_from_slice(self.take(8)?);
                    stack.push(self.alloc(Value::Float(f64::from_be_bytes(buf))));
                }

                op::SHORT_BINUNICODE => {
                    let n = self.byte()? as usize;
                    let s = self.utf8(n)?;
                    stack.push(self.alloc(Value::Str(s)));
                }
                op::BINUNICODE => {
                    let n = self.u32()?;
                    let s = self.utf8(n)?;
                    stack.push(self.alloc(Value::Str(s)));
                }
                op::BINUNICODE8 => {
                    let n = self.u64()?;
                    let s = self.utf8(n)?;
                    stack.push(self.alloc(Value::Str(s)));
                }
                op::UNICODE => {
                    let s = self.line()?.to_string();
                    stack.push(self.alloc(Value::Str(s)));
                }
                op::SHORT_BINBYTES | op::SHORT_BINSTRING => {
                    let n = self.byte()? as usize;
                    let b = self.take(n)?.to_vec();
                    stack.push(self.alloc(Value::Bytes(b)));
                }
                op::BINBYTES | op::BINSTRING => {
                    let n = self.u32()?;
                    let b = self.take(n)?.to_vec();
                    stack.push(self.alloc(Value::Bytes(b)));
                }
                op::BINBYTES8 | op::BYTEARRAY8 => {
                    let n = self.u64()?;
                    let b = self.take(n)?.to_vec();
                    stack.push(self.alloc(Value::Bytes(b)));
                }

                op::EMPTY_LIST => stack.push(self.alloc(Value::List(Vec::new()))),
                op::EMPTY_TUPLE => stack.push(self.alloc(Value::Tuple(Vec::new()))),
                op::EMPTY_DICT => stack.push(self.alloc(Value::Dict(Vec::new()))),
                op::EMPTY_SET => stack.push(self.alloc(Value::Set(Vec::new()))),
                op::LIST => {
                    let items = pop_mark!();
                    stack.push(self.alloc(Value::List(items)));
                }
                op::TUPLE => {
                    let items = pop_mark!();
                    stack.push(self.alloc(Value::Tuple(items)));
                }
                op::FROZENSET => {
                    let items = pop_mark!();
                    stack.push(self.alloc(Value::Set(items)));
                }
                op::TUPLE1 | op::TUPLE2 | op::TUPLE3 => {
                    let n = usize::from(code - op::TUPLE1 + 1);
                    if stack.len() < n {
                        return Err(malformed("stack underflow"));
                    }
                    let items = stack.split_off(stack.len() - n);
                    stack.push(self.alloc(Value::Tuple(items)));
                }
                op::DICT => {
                    let items = pop_mark!();
                    let entries = pairs(items)?;
                    stack.push(self.alloc(Value::Dict(entries)));
                }
                op::APPEND => {
                    let item = pop!();
                    self.extend(top!(), vec![item])?;
                }
                op::APPENDS | op::ADDITEMS => {
                    let items = pop_mark!();
                    self.extend(top!(), items)?;
                }
                op::SETITEM => {
                    let value = pop!();
                    let key = pop!();
                    self.insert(top!(), vec![(key, value)])?;
                }
                op::SETITEMS => {
                    let items = pop_mark!();
                    let entries = pairs(items)?;
                    self.insert(top!(), entries)?;
                }

                op::GLOBAL => {
                    let module = self.line()?.to_string();
                    let name = self.line()?.to_string();
                    stack.push(self.global(module, name));
                }
                op::STACK_GLOBAL => {
                    let name = pop!();
                    let module = pop!();
                    let (module, name) = match (&self.values[module], &self.values[name]) {
                        (Value::Str(m), Value::Str(n)) => (m.clone(), n.clone()),
                        _ => return Err(malformed("STACK_GLOBAL needs two strings")),
                    };
                    stack.push(self.global(module, name));
                }
                op::REDUCE => {
                    let args = pop!();
                    let callable = pop!();
                    stack.push(self.call(callable, args));
                }
                op::NEWOBJ => {
                    let args = pop!();
                    let class = pop!();
                    stack.push(self.alloc(Value::Object {
                        callable: class,
                        args,
                        state: None,
                    }));
                }
                op::NEWOBJ_EX => {
                    let _kwargs = pop!();
                    let args = pop!();
                    let class = pop!();
                    stack.push(self.alloc(Value::Object {
                        callable: class,
                        args,
                        state: None,
                    }));
                }
                op::BUILD => {
                    let state = pop!();
                    let obj = top!();
                    self.build(obj, state, depth)?;
                }

                op::PUT => {
                    let index = self
                        .line()?
                        .parse()
                        .map_err(|_| malformed("bad PUT index"))?;
                    memo.insert(index, top!());
                }
                op::BINPUT => {
                    let index = self.byte()? as usize;
                    memo.insert(index, top!());
                }
                op::LONG_BINPUT => {
                    let index = self.u32()?;
                    memo.insert(index, top!());
                }
                op::MEMOIZE => {
                    let index = memo.len();
                    memo.insert(index, top!());
                }
                op::GET | op::BINGET | op::LONG_BINGET => {
                    let index = match code {
                        op::GET => self
                            .line()?
                            .parse()
                            .map_err(|_| malformed("bad GET index"))?,
                        op::BINGET => self.byte()? as usize,
                        _ => self.u32()?,
                    };
                    let r = *memo
                        .get(&index)
                        .ok_or_else(|| malformed(format!("memo key {} not set", index)))?;
                    stack.push(r);
                }

                other => {
                    return Err(Error::unsupported_format(format!(
                        "pickle opcode 0x{:02x} at byte {} is not supported",
                        other,
                        self.pos - 1
                    )))
                }
            }
        }
    }

    fn global(&mut self, module: String, name: String) -> Ref {
        self.alloc(Value::Global { module, name })
    }

    /// Record a call, folding the few builtins that only rebuild plain data
    fn call(&mut self, callable: Ref, args: Ref) -> Ref {
        let folded = match (&self.values[callable], &self.values[args]) {
            (Value::Global { module, name }, Value::Tuple(items)) => {
                match (module.as_str(), name.as_str(), items.as_slice()) {
                    // Protocol 2 stores bytes as latin-1 text
                    ("_codecs", "encode", [text, ..]) => match &self.values[*text] {
                        Value::Str(s) => Some(Value::Bytes(s.chars().map(|c| c as u32 as u8).collect())),
                        _ => None,
                    },
                    ("builtins" | "__builtin__", "bytearray", [data]) => match &self.values[*data] {
                        Value::Bytes(b) => Some(Value::Bytes(b.clone())),
                        _ => None,
                    },
                    ("builtins" | "__builtin__", "bytearray", []) => Some(Value::Bytes(Vec::new())),
                    ("builtins" | "__builtin__", "set" | "frozenset", [items]) => {
                        match &self.values[*items] {
                            Value::List(items) => Some(Value::Set(items.clone())),
                            _ => None,
                        }
                    }
                    _ => None,
                }
            }
            _ => None,
        };

        self.alloc(folded.unwrap_or(Value::Object {
            callable,
            args,
            state: None,
        }))
    }

    fn extend(&mut self, target: Ref, items: Vec<Ref>) -> Result<()> {
        match &mut self.values[target] {
            Value::List(list) | Value::Set(list) => {
                list.extend(items);
                Ok(())
            }
            _ => Err(malformed("append to a non-list")),
        }
    }

    fn insert(&mut self, target: Ref, entries: Vec<(Ref, Ref)>) -> Result<()> {
        match &mut self.values[target] {
            Value::Dict(dict) => {
                dict.extend(entries);
                Ok(())
            }
            _ => Err(malformed("setitem on a non-dict")),
        }
    }

    fn build(&mut self, obj: Ref, state: Ref, depth: usize) -> Result<()> {
        match &mut self.values[obj] {
            Value::Object { state: slot, .. } => *slot = Some(state),
            _ => return Err(malformed("BUILD on a value that is not an object")),
        }

        let is_wrapper = match &self.values[obj] {
            Value::Object { callable, .. } => matches!(
                &self.values[*callable],
                Value::Global { module, name }
                    if module == "joblib.numpy_pickle" && name == "NumpyArrayWrapper"
            ),
            _ => false,
        };
        if is_wrapper {
            let array = self.read_wrapped_array(obj, depth)?;
            self.values[obj] = array;
        }
        Ok(())
    }

    /// Read the array data joblib writes right after a wrapper
    fn read_wrapped_array(&mut self, wrapper: Ref, depth: usize) -> Result<Value> {
        let view = Pickle {
            values: std::mem::take(&mut self.values),
            root: wrapper,
        };
        let header = numpy::WrapperHeader::from_pickle(&view, wrapper);
        self.values = view.values;
        let header = header?;

        if header.dtype.is_object() {
            // Object arrays are a nested protocol 2 pickle
            let nested = self.run(depth + 1)?;
            return Ok(self.values[nested].clone());
        }

        if let Some(alignment) = header.alignment {
            if alignment > 0 {
                let padding = self.byte()? as usize;
                self.take(padding)?;
            }
        }

        let size = header
            .count()
            .checked_mul(header.dtype.itemsize)
            .ok_or_else(|| malformed("array size overflows"))?;
        let data = self.take(size)?.to_vec();
        Ok(Value::Array(header.into_array(data)?))
    }
}

fn pairs(items: Vec<Ref>) -> Result<Vec<(Ref, Ref)>> {
    if items.len() % 2 != 0 {
        return Err(malformed("odd number of dict items"));
    }
    Ok(items.chunks(2).map(|kv| (kv[0], kv[1])).collect())
}

/// Two's complement little-endian integer
fn long(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Int(0);
    }
    if bytes.len() > 8 {
        return Value::BigInt;
    }
    let fill = if bytes[bytes.len() - 1] & 0x80 != 0 { 0xff } else { 0 };
    let mut buf = [fill; 8];
    buf[..bytes.len()].copy_from_slice(bytes);
    Value::Int(i64::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_data_protocol_2() {
        // {'a': [1, 2.5, None, True], 'b': 'x'}
        let bytes = b"\x80\x02}q\x00(X\x01\x00\x00\x00aq\x01]q\x02(K\x01G@\x04\x00\x00\x00\x00\x00\x00N\x88eX\x01\x00\x00\x00bq\x03X\x01\x00\x00\x00xq\x04u.";
        let pickle = Pickle::parse(bytes).unwrap();
        let root = pickle.root();

        let a = pickle.dict_get(root, "a").unwrap();
        let items = pickle.items(a).unwrap();
        assert_eq!(pickle.as_int(items[0]), Some(1));
        assert_eq!(pickle.as_float(items[1]), Some(2.5));
        assert!(pickle.is_none(items[2]));
        assert_eq!(pickle.get(items[3]), &Value::Bool(true));
        assert_eq!(pickle.dict_get(root, "b").and_then(|b| pickle.as_str(b)), Some("x"));
    }

    #[test]
    fn test_object_recipe_with_memo_and_build() {
        // protocol 4: copyreg.__newobj__ of pkg.mod.Thing with state {'k': -2}, twice via memo
        let bytes = b"\x80\x04\x95\x00\x00\x00\x00\x00\x00\x00\x00\x8c\x07pkg.mod\x94\x8c\x05Thing\x94\x93\x94)\x81\x94}\x94\x8c\x01k\x94J\xfe\xff\xff\xffsbh\x03\x86\x94.";
        let pickle = Pickle::parse(bytes).unwrap();
        let pair = pickle.items(pickle.root()).unwrap();

        assert_eq!(pair[0], pair[1]);
        assert_eq!(pickle.class_of(pair[0]), Some(("pkg.mod", "Thing")));
        assert_eq!(pickle.attr(pair[0], "k").and_then(|k| pickle.as_int(k)), Some(-2));
    }

    #[test]
    fn test_long_is_twos_complement() {
        assert_eq!(long(&[0xff, 0x00]), Value::Int(255));
        assert_eq!(long(&[0xff]), Value::Int(-1));
        assert_eq!(long(&[0x00, 0x80]), Value::Int(-32768));
        assert_eq!(long(&[1; 9]), Value::BigInt);
    }

    #[test]
    fn test_protocol_2_bytes_are_folded() {
        // _codecs.encode('\xff\x01', 'latin1')
        let bytes = b"\x80\x02c_codecs\nencode\nq\x00X\x04\x00\x00\x00\xc3\xbf\x01\x00q\x01X\x06\x00\x00\x00latin1q\x02\x86q\x03Rq\x04.";
        let pickle = Pickle::parse(bytes).unwrap();
        assert_eq!(pickle.as_bytes(pickle.root()), Some(&[0xff, 0x01, 0x00][..]));
    }

    #[test]
    fn test_malformed_input() {
        assert!(matches!(Pickle::parse(b""), Err(Error::Load(_))));
        assert!(matches!(Pickle::parse(b"\x80\x04K"), Err(Error::Load(_))));
        assert!(matches!(Pickle::parse(b"\x80\x02h\x05."), Err(Error::Load(_))));
        assert!(matches!(Pickle::parse(b"\x80\x02P1\n."), Err(Error::UnsupportedFormat(_))));
    }
}
