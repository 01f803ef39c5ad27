use std::ffi::{CString, c_int, c_void};

use rusqlite::ffi;

use crate::error::{Error, Result};
use crate::stmt::CompiledStatement;
use crate::value::Value;

/// Key for a named parameter binding.
///
/// Positions address placeholders directly; names are resolved through the
/// engine's parameter index, with the `:` prefix supplied when missing.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamKey {
    Position(i32),
    Name(String),
}

impl From<i32> for ParamKey {
    fn from(v: i32) -> Self {
        ParamKey::Position(v)
    }
}

impl From<&str> for ParamKey {
    fn from(v: &str) -> Self {
        ParamKey::Name(v.to_string())
    }
}

impl From<String> for ParamKey {
    fn from(v: String) -> Self {
        ParamKey::Name(v)
    }
}

/// Parameters for one statement invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Params {
    #[default]
    None,
    /// Values bound at positions `1..=n`.
    Positional(Vec<Value>),
    /// Values bound by explicit position or placeholder name.
    Named(Vec<(ParamKey, Value)>),
}

impl Params {
    pub fn positional<I, T>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        Params::Positional(values.into_iter().map(Into::into).collect())
    }

    pub fn named<I, K, T>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, T)>,
        K: Into<ParamKey>,
        T: Into<Value>,
    {
        Params::Named(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Params::None => true,
            Params::Positional(v) => v.is_empty(),
            Params::Named(v) => v.is_empty(),
        }
    }

    /// Binds all parameters to a compiled statement. Bind return codes are
    /// checked; an out-of-range position or unknown name is a parameter
    /// error.
    pub(crate) fn bind(&self, stmt: &CompiledStatement) -> Result<()> {
        match self {
            Params::None => Ok(()),
            Params::Positional(values) => {
                for (i, value) in values.iter().enumerate() {
                    bind_value(stmt, (i + 1) as c_int, value)?;
                }
                Ok(())
            }
            Params::Named(entries) => {
                for (key, value) in entries {
                    let pos = resolve_key(stmt, key)?;
                    bind_value(stmt, pos, value)?;
                }
                Ok(())
            }
        }
    }
}

fn resolve_key(stmt: &CompiledStatement, key: &ParamKey) -> Result<c_int> {
    match key {
        ParamKey::Position(pos) => Ok(*pos),
        ParamKey::Name(name) => {
            let normalized = normalized_name(name);
            let cname = CString::new(normalized.as_str())
                .map_err(|_| Error::parameter(format!("parameter name {:?} contains NUL", name)))?;
            let pos = unsafe { ffi::sqlite3_bind_parameter_index(stmt.as_ptr(), cname.as_ptr()) };
            if pos == 0 {
                return Err(Error::parameter(format!("unknown parameter: {}", normalized)));
            }
            Ok(pos)
        }
    }
}

pub(crate) fn normalized_name(name: &str) -> String {
    if name.starts_with(':') {
        name.to_string()
    } else {
        format!(":{}", name)
    }
}

fn bind_value(stmt: &CompiledStatement, pos: c_int, value: &Value) -> Result<()> {
    let p = stmt.as_ptr();
    // Text and blob are bound transiently so the engine copies the bytes
    // and the binding outlives the borrowed value.
    let rc = unsafe {
        match value {
            Value::Null => ffi::sqlite3_bind_null(p, pos),
            Value::Integer(i) => ffi::sqlite3_bind_int64(p, pos, *i),
            Value::Real(f) => ffi::sqlite3_bind_double(p, pos, *f),
            Value::Text(s) => ffi::sqlite3_bind_text(
                p,
                pos,
                s.as_ptr() as *const std::ffi::c_char,
                s.len() as c_int,
                ffi::SQLITE_TRANSIENT(),
            ),
            Value::Blob(b) => ffi::sqlite3_bind_blob(
                p,
                pos,
                b.as_ptr() as *const c_void,
                b.len() as c_int,
                ffi::SQLITE_TRANSIENT(),
            ),
        }
    };
    match rc {
        ffi::SQLITE_OK => Ok(()),
        ffi::SQLITE_RANGE => Err(Error::parameter(format!(
            "parameter position {} is out of range",
            pos
        ))),
        code => Err(Error::engine(code, format!("failed to bind parameter {}", pos))),
    }
}

impl From<()> for Params {
    fn from(_: ()) -> Self {
        Params::None
    }
}

impl From<Value> for Params {
    fn from(v: Value) -> Self {
        Params::Positional(vec![v])
    }
}

impl From<Vec<Value>> for Params {
    fn from(v: Vec<Value>) -> Self {
        Params::Positional(v)
    }
}

impl From<&[Value]> for Params {
    fn from(v: &[Value]) -> Self {
        Params::Positional(v.to_vec())
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for Params {
    fn from(v: [T; N]) -> Self {
        Params::Positional(v.into_iter().map(Into::into).collect())
    }
}

macro_rules! impl_params_for_tuple {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name: Into<Value>),+> From<($($name,)+)> for Params {
            fn from(t: ($($name,)+)) -> Self {
                Params::Positional(vec![$(t.$idx.into()),+])
            }
        }
    };
}

impl_params_for_tuple!(A: 0);
impl_params_for_tuple!(A: 0, B: 1);
impl_params_for_tuple!(A: 0, B: 1, C: 2);
impl_params_for_tuple!(A: 0, B: 1, C: 2, D: 3);
impl_params_for_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4);
impl_params_for_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);
impl_params_for_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6);
impl_params_for_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_normalization_adds_colon_prefix() {
        assert_eq!(normalized_name("foo"), ":foo");
        assert_eq!(normalized_name(":foo"), ":foo");
    }

    #[test]
    fn tuples_flatten_to_positional() {
        let params = Params::from((1, "x", 2.5));
        assert_eq!(
            params,
            Params::Positional(vec![
                Value::Integer(1),
                Value::Text("x".to_string()),
                Value::Real(2.5),
            ])
        );
    }

    #[test]
    fn named_constructor_accepts_mixed_keys() {
        let params = Params::named([("a", Value::Integer(1)), (":b", Value::Integer(2))]);
        match params {
            Params::Named(entries) => {
                assert_eq!(entries.len(), 2);
                assert_eq!(entries[0].0, ParamKey::Name("a".to_string()));
            }
            other => panic!("expected named params, got {:?}", other),
        }
    }
}
