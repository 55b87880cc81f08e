use anyhow::{Context, Result};
use tracing::info;

use super::pool::Pool;

/// SQL data type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Serial,
    SmallInt,
    Integer,
    Real,
    Varchar,
    Timestamp,
}

impl SqlType {
    /// Returns the Postgres type name
    pub fn to_postgres(self) -> &'static str {
        match self {
            SqlType::Serial => "SERIAL",
            SqlType::SmallInt => "SMALLINT",
            SqlType::Integer => "INTEGER",
            SqlType::Real => "REAL",
            SqlType::Varchar => "VARCHAR",
            SqlType::Timestamp => "TIMESTAMP",
        }
    }

    /// Returns the SQLite affinity used by the test store
    pub fn to_sqlite(self) -> &'static str {
        match self {
            SqlType::Serial | SqlType::SmallInt | SqlType::Integer => "INTEGER",
            SqlType::Real => "REAL",
            SqlType::Varchar | SqlType::Timestamp => "TEXT",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub sql_type: SqlType,
    pub nullable: bool,
    pub primary_key: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct Table {
    pub name: &'static str,
    pub columns: &'static [Column],
}

const fn key(name: &'static str, sql_type: SqlType) -> Column {
    Column {
        name,
        sql_type,
        nullable: false,
        primary_key: true,
    }
}

const fn required(name: &'static str, sql_type: SqlType) -> Column {
    Column {
        name,
        sql_type,
        nullable: false,
        primary_key: false,
    }
}

const fn optional(name: &'static str, sql_type: SqlType) -> Column {
    Column {
        name,
        sql_type,
        nullable: true,
        primary_key: false,
    }
}

pub const USERS: Table = Table {
    name: "users",
    columns: &[
        key("user_id", SqlType::Integer),
        optional("first_name", SqlType::Varchar),
        optional("last_name", SqlType::Varchar),
        optional("gender", SqlType::Varchar),
        optional("level", SqlType::Varchar),
    ],
};

pub const SONGS: Table = Table {
    name: "songs",
    columns: &[
        key("song_id", SqlType::Varchar),
        optional("title", SqlType::Varchar),
        optional("artist_id", SqlType::Varchar),
        optional("year", SqlType::SmallInt),
        optional("duration_str", SqlType::Varchar),
        optional("duration_float", SqlType::Real),
    ],
};

pub const ARTISTS: Table = Table {
    name: "artists",
    columns: &[
        key("artist_id", SqlType::Varchar),
        optional("name", SqlType::Varchar),
        optional("location", SqlType::Varchar),
        optional("latitude", SqlType::Real),
        optional("longitude", SqlType::Real),
    ],
};

pub const TIME: Table = Table {
    name: "time",
    columns: &[
        key("start_time", SqlType::Timestamp),
        required("hour", SqlType::SmallInt),
        required("day", SqlType::SmallInt),
        required("week", SqlType::SmallInt),
        required("month", SqlType::SmallInt),
        required("year", SqlType::SmallInt),
        required("weekday", SqlType::SmallInt),
    ],
};

pub const SONGPLAYS: Table = Table {
    name: "songplays",
    columns: &[
        key("songplay_id", SqlType::Serial),
        required("start_time", SqlType::Timestamp),
        required("user_id", SqlType::Integer),
        required("level", SqlType::Varchar),
        optional("song_id", SqlType::Varchar),
        optional("artist_id", SqlType::Varchar),
        optional("session_id", SqlType::Varchar),
        optional("location", SqlType::Varchar),
        optional("user_agent", SqlType::Varchar),
    ],
};

/// Creation order. The fact table comes last.
pub const TABLES: [Table; 5] = [USERS, SONGS, ARTISTS, TIME, SONGPLAYS];

/// Generate DDL statement for creating a table
pub fn generate_ddl(table: &Table, postgres: bool) -> String {
    let mut ddl = format!("CREATE TABLE IF NOT EXISTS \"{}\" (\n", table.name);

    let column_defs: Vec<String> = table
        .columns
        .iter()
        .map(|col| {
            let type_name = if postgres {
                col.sql_type.to_postgres()
            } else {
                col.sql_type.to_sqlite()
            };
            let constraint = if col.primary_key {
                " PRIMARY KEY"
            } else if col.nullable {
                ""
            } else {
                " NOT NULL"
            };
            format!("  \"{}\" {}{}", col.name, type_name, constraint)
        })
        .collect();

    ddl.push_str(&column_defs.join(",\n"));
    ddl.push_str("\n);");

    ddl
}

/// Create all five tables if they are missing
pub async fn create_tables(pool: &Pool) -> Result<()> {
    for table in &TABLES {
        let ddl = generate_ddl(table, pool.is_postgres());
        pool.execute_query(&ddl)
            .await
            .with_context(|| format!("Failed to create table '{}'", table.name))?;
    }
    Ok(())
}

/// Drop all five tables, fact table first
pub async fn drop_tables(pool: &Pool) -> Result<()> {
    for table in TABLES.iter().rev() {
        let sql = format!("DROP TABLE IF EXISTS \"{}\"", table.name);
        pool.execute_query(&sql)
            .await
            .with_context(|| format!("Failed to drop table '{}'", table.name))?;
    }
    Ok(())
}

/// Drop then recreate the whole schema. Destroys all loaded data.
pub async fn reset_schema(pool: &Pool) -> Result<()> {
    drop_tables(pool).await?;
    create_tables(pool).await?;
    info!("Schema reset: {} tables recreated", TABLES.len());
    Ok(())
}

/// Empty the fact table so that a re-run does not duplicate song plays
pub async fn truncate_songplays(pool: &Pool) -> Result<u64> {
    let sql = if pool.is_postgres() {
        format!("TRUNCATE TABLE \"{}\"", SONGPLAYS.name)
    } else {
        format!("DELETE FROM \"{}\"", SONGPLAYS.name)
    };

    let removed = pool
        .execute_query(&sql)
        .await
        .context("Failed to truncate songplays")?;
    info!("Truncated songplays");
    Ok(removed)
}
