//! Bound SQL arguments as seen by hooks.

use std::fmt;
use std::sync::Arc;

use sea_orm::{Value, Values};
use serde::ser::{Error as _, Serialize, Serializer};

/// One bound argument of a SQL statement.
///
/// Hooks receive the arguments of every operation as a slice of `Arg`, and
/// SQL formatters render them into the `db.statement` attribute.
#[derive(Clone)]
pub enum Arg {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
    /// An indirect reference to another argument.
    ///
    /// Substituting formatters render the referent, never the reference.
    Ref(Box<Arg>),
    /// A value that can only be displayed. It has no structured
    /// serialization, so formatters fall back to plain text when they meet it.
    Opaque(Arc<dyn fmt::Display + Send + Sync>),
}

impl Arg {
    /// Wrap a value in an indirect reference.
    pub fn reference(value: impl Into<Arg>) -> Self {
        Arg::Ref(Box::new(value.into()))
    }

    /// Wrap a display-only value.
    pub fn opaque(value: impl fmt::Display + Send + Sync + 'static) -> Self {
        Arg::Opaque(Arc::new(value))
    }

    /// The value this argument ultimately refers to.
    pub fn referent(&self) -> &Arg {
        match self {
            Arg::Ref(inner) => inner.referent(),
            other => other,
        }
    }

    /// Convert the bound values of a SeaORM statement.
    pub fn from_values(values: Option<&Values>) -> Vec<Arg> {
        values
            .map(|values| values.0.iter().map(Arg::from).collect())
            .unwrap_or_default()
    }
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Null => f.write_str("Null"),
            Arg::Bool(v) => f.debug_tuple("Bool").field(v).finish(),
            Arg::Int(v) => f.debug_tuple("Int").field(v).finish(),
            Arg::UInt(v) => f.debug_tuple("UInt").field(v).finish(),
            Arg::Float(v) => f.debug_tuple("Float").field(v).finish(),
            Arg::Text(v) => f.debug_tuple("Text").field(v).finish(),
            Arg::Bytes(v) => f.debug_tuple("Bytes").field(v).finish(),
            Arg::Json(v) => f.debug_tuple("Json").field(v).finish(),
            Arg::Ref(v) => f.debug_tuple("Ref").field(v).finish(),
            Arg::Opaque(v) => f.debug_tuple("Opaque").field(&v.to_string()).finish(),
        }
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Null => f.write_str("NULL"),
            Arg::Bool(v) => write!(f, "{v}"),
            Arg::Int(v) => write!(f, "{v}"),
            Arg::UInt(v) => write!(f, "{v}"),
            Arg::Float(v) => write!(f, "{v}"),
            Arg::Text(v) => f.write_str(v),
            Arg::Bytes(v) => {
                f.write_str("\\x")?;
                v.iter().try_for_each(|b| write!(f, "{b:02x}"))
            }
            Arg::Json(v) => write!(f, "{v}"),
            Arg::Ref(v) => write!(f, "&{v}"),
            Arg::Opaque(v) => write!(f, "{v}"),
        }
    }
}

impl Serialize for Arg {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Arg::Null => serializer.serialize_none(),
            Arg::Bool(v) => serializer.serialize_bool(*v),
            Arg::Int(v) => serializer.serialize_i64(*v),
            Arg::UInt(v) => serializer.serialize_u64(*v),
            Arg::Float(v) => serializer.serialize_f64(*v),
            Arg::Text(v) => serializer.serialize_str(v),
            Arg::Bytes(v) => serializer.serialize_bytes(v),
            Arg::Json(v) => v.serialize(serializer),
            Arg::Ref(v) => v.serialize(serializer),
            Arg::Opaque(_) => Err(S::Error::custom("opaque argument has no structured form")),
        }
    }
}

impl PartialEq for Arg {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Arg::Null, Arg::Null) => true,
            (Arg::Bool(a), Arg::Bool(b)) => a == b,
            (Arg::Int(a), Arg::Int(b)) => a == b,
            (Arg::UInt(a), Arg::UInt(b)) => a == b,
            (Arg::Float(a), Arg::Float(b)) => a == b,
            (Arg::Text(a), Arg::Text(b)) => a == b,
            (Arg::Bytes(a), Arg::Bytes(b)) => a == b,
            (Arg::Json(a), Arg::Json(b)) => a == b,
            (Arg::Ref(a), Arg::Ref(b)) => a == b,
            (Arg::Opaque(a), Arg::Opaque(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

macro_rules! impl_from {
    ($variant:ident: $($ty:ty),+) => {
        $(
            impl From<$ty> for Arg {
                fn from(value: $ty) -> Self {
                    Arg::$variant(value.into())
                }
            }
        )+
    };
}

impl_from!(Bool: bool);
impl_from!(Int: i8, i16, i32, i64);
impl_from!(UInt: u8, u16, u32, u64);
impl_from!(Float: f32, f64);
impl_from!(Text: &str, String, char);
impl_from!(Bytes: Vec<u8>, &[u8]);
impl_from!(Json: serde_json::Value);

impl<T: Into<Arg>> From<Option<T>> for Arg {
    fn from(value: Option<T>) -> Self {
        value.map_or(Arg::Null, Into::into)
    }
}

impl<T: Into<Arg>> From<Box<T>> for Arg {
    fn from(value: Box<T>) -> Self {
        Arg::Ref(Box::new((*value).into()))
    }
}

impl From<&Value> for Arg {
    fn from(value: &Value) -> Self {
        match value {
            Value::Bool(v) => (*v).into(),
            Value::TinyInt(v) => (*v).into(),
            Value::SmallInt(v) => (*v).into(),
            Value::Int(v) => (*v).into(),
            Value::BigInt(v) => (*v).into(),
            Value::TinyUnsigned(v) => (*v).into(),
            Value::SmallUnsigned(v) => (*v).into(),
            Value::Unsigned(v) => (*v).into(),
            Value::BigUnsigned(v) => (*v).into(),
            Value::Float(v) => (*v).into(),
            Value::Double(v) => (*v).into(),
            Value::Char(v) => (*v).into(),
            Value::String(v) => v.as_ref().map_or(Arg::Null, |s| Arg::Text(s.to_string())),
            Value::Bytes(v) => v.as_ref().map_or(Arg::Null, |b| Arg::Bytes(b.to_vec())),
            #[cfg(feature = "with-json")]
            Value::Json(v) => v
                .as_ref()
                .map_or(Arg::Null, |j| Arg::Json(serde_json::Value::clone(j))),
            #[cfg(feature = "with-uuid")]
            Value::Uuid(v) => display_or_null(v.as_ref()),
            #[cfg(feature = "with-rust_decimal")]
            Value::Decimal(v) => display_or_null(v.as_ref()),
            #[cfg(feature = "with-chrono")]
            Value::ChronoDate(v) => display_or_null(v.as_ref()),
            #[cfg(feature = "with-chrono")]
            Value::ChronoTime(v) => display_or_null(v.as_ref()),
            #[cfg(feature = "with-chrono")]
            Value::ChronoDateTime(v) => display_or_null(v.as_ref()),
            #[cfg(feature = "with-chrono")]
            Value::ChronoDateTimeUtc(v) => display_or_null(v.as_ref()),
            #[cfg(feature = "with-chrono")]
            Value::ChronoDateTimeLocal(v) => display_or_null(v.as_ref()),
            #[cfg(feature = "with-chrono")]
            Value::ChronoDateTimeWithTimeZone(v) => display_or_null(v.as_ref()),
            // Types behind features this crate does not forward keep their debug form.
            #[allow(unreachable_patterns)]
            other => Arg::Text(format!("{other:?}")),
        }
    }
}

#[cfg(any(feature = "with-uuid", feature = "with-rust_decimal", feature = "with-chrono"))]
fn display_or_null<T: fmt::Display>(value: Option<T>) -> Arg {
    value.map_or(Arg::Null, |v| Arg::Text(v.to_string()))
}
