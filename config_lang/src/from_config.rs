use std::collections::HashMap;
use std::hash::Hash;
use std::str::FromStr;

use crate::parser::{ConfigError, Parser};
use crate::value::Value;

/// Deserialization from a parsed [`Value`]. Grounded on this crate's
/// predecessor's `FromYaml` (`parser/src/from_yaml.rs`); `#[derive(FromConfig)]` in
/// `config_lang_derive` generates the struct-level impls the same way
/// `derive_yaml` generated `FromYaml` impls.
pub trait FromConfig: Sized {
    fn from_value(value: &Value) -> Result<Self, ConfigError>;

    fn from_value_opt(value: Option<&Value>) -> Result<Self, ConfigError>
    where
        Self: Default,
    {
        match value {
            Some(v) => Self::from_value(v),
            None => Ok(Self::default()),
        }
    }

    fn from_str(source: &str) -> Result<Self, ConfigError> {
        let mut parser = Parser::new(source)?;
        let value = parser.parse()?;
        Self::from_value(&value)
    }
}

impl FromConfig for String {
    fn from_value(value: &Value) -> Result<Self, ConfigError> {
        value
            .as_scalar()
            .map(str::to_string)
            .ok_or_else(|| ConfigError::Invalid(format!("expected a scalar string, found {value:?}")))
    }
}

impl FromConfig for bool {
    fn from_value(value: &Value) -> Result<Self, ConfigError> {
        let s = value
            .as_scalar()
            .ok_or_else(|| ConfigError::Invalid(format!("expected a scalar bool, found {value:?}")))?;
        match s {
            "true" | "yes" | "on" => Ok(true),
            "false" | "no" | "off" => Ok(false),
            other => Err(ConfigError::Invalid(format!("'{other}' is not a boolean"))),
        }
    }
}

macro_rules! impl_from_config_numeric {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FromConfig for $ty {
                fn from_value(value: &Value) -> Result<Self, ConfigError> {
                    let s = value.as_scalar().ok_or_else(|| {
                        ConfigError::Invalid(format!("expected a scalar number, found {value:?}"))
                    })?;
                    <$ty as FromStr>::from_str(s)
                        .map_err(|_| ConfigError::Invalid(format!("'{s}' is not a valid {}", stringify!($ty))))
                }
            }
        )*
    };
}

impl_from_config_numeric!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize, f32, f64);

impl<T: FromConfig> FromConfig for Vec<T> {
    fn from_value(value: &Value) -> Result<Self, ConfigError> {
        match value {
            Value::List(items) => items.iter().map(T::from_value).collect(),
            Value::Scalar(s) if s.is_empty() => Ok(Vec::new()),
            other => Err(ConfigError::Invalid(format!("expected a list, found {other:?}"))),
        }
    }
}

impl<T: FromConfig> FromConfig for Option<T> {
    fn from_value(value: &Value) -> Result<Self, ConfigError> {
        match value {
            Value::Scalar(s) if s.is_empty() => Ok(None),
            other => Ok(Some(T::from_value(other)?)),
        }
    }

    fn from_value_opt(value: Option<&Value>) -> Result<Self, ConfigError> {
        match value {
            Some(v) => Self::from_value(v),
            None => Ok(None),
        }
    }
}

impl<K, V> FromConfig for HashMap<K, V>
where
    K: FromStr + Eq + Hash,
    V: FromConfig,
{
    fn from_value(value: &Value) -> Result<Self, ConfigError> {
        match value {
            Value::Map(map) => map
                .iter()
                .map(|(k, v)| {
                    let key = K::from_str(k)
                        .map_err(|_| ConfigError::Invalid(format!("'{k}' is not a valid map key")))?;
                    Ok((key, V::from_value(v)?))
                })
                .collect(),
            other => Err(ConfigError::Invalid(format!("expected a map, found {other:?}"))),
        }
    }
}
