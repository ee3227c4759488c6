/// PostgreSQL type OIDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PgType {
    Bool = 16,
    Bytea = 17,
    Int8 = 20,
    Int2 = 21,
    Int4 = 23,
    Text = 25,
    Float4 = 700,
    Float8 = 701,
    Unknown = 705,
    Varchar = 1043,
    Date = 1082,
    Time = 1083,
    Timestamp = 1114,
    Numeric = 1700,
}

impl PgType {
    pub fn from_oid(oid: i32) -> Option<Self> {
        match oid {
            16 => Some(PgType::Bool),
            17 => Some(PgType::Bytea),
            20 => Some(PgType::Int8),
            21 => Some(PgType::Int2),
            23 => Some(PgType::Int4),
            25 => Some(PgType::Text),
            700 => Some(PgType::Float4),
            701 => Some(PgType::Float8),
            705 => Some(PgType::Unknown),
            1043 => Some(PgType::Varchar),
            1082 => Some(PgType::Date),
            1083 => Some(PgType::Time),
            1114 => Some(PgType::Timestamp),
            1700 => Some(PgType::Numeric),
            _ => None,
        }
    }

    pub fn to_oid(&self) -> i32 {
        *self as i32
    }

    /// `typlen` as reported in RowDescription; -1 for variable-length types.
    pub fn type_size(&self) -> i16 {
        match self {
            PgType::Bool => 1,
            PgType::Int2 => 2,
            PgType::Int4 | PgType::Float4 | PgType::Date => 4,
            PgType::Int8 | PgType::Float8 | PgType::Time | PgType::Timestamp => 8,
            PgType::Unknown => -2,
            PgType::Bytea | PgType::Text | PgType::Varchar | PgType::Numeric => -1,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PgType::Bool => "bool",
            PgType::Bytea => "bytea",
            PgType::Int8 => "int8",
            PgType::Int2 => "int2",
            PgType::Int4 => "int4",
            PgType::Text => "text",
            PgType::Float4 => "float4",
            PgType::Float8 => "float8",
            PgType::Unknown => "unknown",
            PgType::Varchar => "varchar",
            PgType::Date => "date",
            PgType::Time => "time",
            PgType::Timestamp => "timestamp",
            PgType::Numeric => "numeric",
        }
    }

    /// Whether values of this type can be sent in binary result format.
    /// Numeric and the date/time types are stored by SQLite as text or
    /// numbers without a fixed epoch, so only their text form is produced.
    pub fn supports_binary(&self) -> bool {
        !matches!(
            self,
            PgType::Numeric | PgType::Date | PgType::Time | PgType::Timestamp
        )
    }

    /// Types a Bind parameter can be decoded as.
    pub fn is_parameter_type(&self) -> bool {
        matches!(
            self,
            PgType::Bool
                | PgType::Int2
                | PgType::Int4
                | PgType::Int8
                | PgType::Float4
                | PgType::Float8
                | PgType::Text
                | PgType::Varchar
                | PgType::Unknown
        )
    }

    /// Map a SQLite declared column type to the PostgreSQL type reported to
    /// clients.
    ///
    /// SQLite's affinity rules are substring based, so this follows them:
    /// anything containing `INT` is an integer, `CHAR`/`CLOB`/`TEXT` is text
    /// and so on. Expression columns have no declared type and are reported
    /// as varchar.
    pub fn from_decltype(decltype: Option<&str>) -> PgType {
        let Some(decl) = decltype else {
            return PgType::Varchar;
        };
        let upper = decl.trim().to_ascii_uppercase();
        // Strip a length/precision suffix such as VARCHAR(20) or NUMERIC(10,2)
        let base = upper.split('(').next().unwrap_or("").trim();

        match base {
            "BOOL" | "BOOLEAN" => return PgType::Bool,
            "SMALLINT" | "INT2" | "TINYINT" => return PgType::Int2,
            "BIGINT" | "INT8" | "UNSIGNED BIG INT" => return PgType::Int8,
            "FLOAT4" => return PgType::Float4,
            "TEXT" => return PgType::Text,
            "DATE" => return PgType::Date,
            "TIME" => return PgType::Time,
            "DATETIME" | "TIMESTAMP" => return PgType::Timestamp,
            "NUMERIC" | "DECIMAL" => return PgType::Numeric,
            _ => {}
        }

        if base.contains("INT") {
            PgType::Int4
        } else if base.contains("CHAR") || base.contains("CLOB") || base.contains("TEXT") {
            PgType::Varchar
        } else if base.contains("BLOB") || base.is_empty() {
            PgType::Bytea
        } else if base.contains("REAL") || base.contains("FLOA") || base.contains("DOUB") {
            PgType::Float8
        } else {
            PgType::Varchar
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oid_round_trip() {
        for ty in [PgType::Bool, PgType::Int4, PgType::Varchar, PgType::Numeric] {
            assert_eq!(PgType::from_oid(ty.to_oid()), Some(ty));
        }
        assert_eq!(PgType::from_oid(2950), None);
    }

    #[test]
    fn test_from_decltype() {
        assert_eq!(PgType::from_decltype(Some("INTEGER")), PgType::Int4);
        assert_eq!(PgType::from_decltype(Some("bigint")), PgType::Int8);
        assert_eq!(PgType::from_decltype(Some("VARCHAR(20)")), PgType::Varchar);
        assert_eq!(PgType::from_decltype(Some("TEXT")), PgType::Text);
        assert_eq!(PgType::from_decltype(Some("double precision")), PgType::Float8);
        assert_eq!(PgType::from_decltype(Some("NUMERIC(10,2)")), PgType::Numeric);
        assert_eq!(PgType::from_decltype(Some("BLOB")), PgType::Bytea);
        assert_eq!(PgType::from_decltype(Some("boolean")), PgType::Bool);
        assert_eq!(PgType::from_decltype(None), PgType::Varchar);
    }

    #[test]
    fn test_type_size() {
        assert_eq!(PgType::Int4.type_size(), 4);
        assert_eq!(PgType::Varchar.type_size(), -1);
        assert_eq!(PgType::Int8.type_size(), 8);
    }
}
