use bytes::BytesMut;
use mongres_ql::Value;
use tokio_postgres::types::{IsNull, ToSql, Type};

/// A bound statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum PgParam {
    Text(String),
    BigInt(i64),
    Jsonb(serde_json::Value),
    /// A `text[]` path for the `#>`, `#-` and `jsonb_set` operators
    Path(Vec<String>),
}

impl PgParam {
    pub fn jsonb(value: &Value) -> Self { PgParam::Jsonb(value.clone().into()) }
}

impl ToSql for PgParam {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            PgParam::Text(v) => v.to_sql(ty, out),
            PgParam::BigInt(v) => v.to_sql(ty, out),
            PgParam::Jsonb(v) => v.to_sql(ty, out),
            PgParam::Path(v) => v.to_sql(ty, out),
        }
    }

    fn accepts(ty: &Type) -> bool {
        <String as ToSql>::accepts(ty)
            || <i64 as ToSql>::accepts(ty)
            || <serde_json::Value as ToSql>::accepts(ty)
            || <Vec<String> as ToSql>::accepts(ty)
    }

    // `accepts` is the union over variants, so the type check has to happen per variant
    fn to_sql_checked(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            PgParam::Text(v) => v.to_sql_checked(ty, out),
            PgParam::BigInt(v) => v.to_sql_checked(ty, out),
            PgParam::Jsonb(v) => v.to_sql_checked(ty, out),
            PgParam::Path(v) => v.to_sql_checked(ty, out),
        }
    }
}

pub(crate) fn param_refs(params: &[PgParam]) -> Vec<&(dyn ToSql + Sync)> { params.iter().map(|p| p as &(dyn ToSql + Sync)).collect() }
