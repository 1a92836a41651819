use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DbError;

/// Backend families this gateway can route to.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    PostgreSQL,
    MySQL,
    SQLite,
    ClickHouse,
    MongoDB,
}

impl DatabaseType {
    /// Stable identifier used as registry key and in result metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseType::PostgreSQL => "postgres",
            DatabaseType::MySQL => "mysql",
            DatabaseType::SQLite => "sqlite",
            DatabaseType::ClickHouse => "clickhouse",
            DatabaseType::MongoDB => "mongodb",
        }
    }
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatabaseType {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(DatabaseType::PostgreSQL),
            "mysql" | "mariadb" => Ok(DatabaseType::MySQL),
            "sqlite" => Ok(DatabaseType::SQLite),
            "clickhouse" => Ok(DatabaseType::ClickHouse),
            "mongodb" | "mongo" => Ok(DatabaseType::MongoDB),
            other => Err(DbError::UnsupportedBackend(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_round_trip() {
        for db in [
            DatabaseType::PostgreSQL,
            DatabaseType::MySQL,
            DatabaseType::SQLite,
            DatabaseType::ClickHouse,
            DatabaseType::MongoDB,
        ] {
            assert_eq!(db.as_str().parse::<DatabaseType>().unwrap(), db);
        }
    }

    #[test]
    fn test_aliases_and_unknown() {
        assert_eq!(
            "PostgreSQL".parse::<DatabaseType>().unwrap(),
            DatabaseType::PostgreSQL
        );
        assert_eq!("mongo".parse::<DatabaseType>().unwrap(), DatabaseType::MongoDB);
        assert!("oracle".parse::<DatabaseType>().is_err());
    }
}
