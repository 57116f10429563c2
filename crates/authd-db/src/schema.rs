//! Schema DDL and table/column name constants (spec.md §6).

/// Schema DDL applied in a single transaction on first creation of
/// `authd.db`. All `name` and `ugid` text is stored lowercase by callers;
/// the schema itself does not enforce case.
pub const CREATE_SCHEMA_SQL: &str = r#"
CREATE TABLE users (
    name        TEXT NOT NULL UNIQUE,
    uid         INTEGER PRIMARY KEY,
    gid         INTEGER NOT NULL,
    gecos       TEXT NOT NULL DEFAULT '',
    dir         TEXT NOT NULL DEFAULT '',
    shell       TEXT NOT NULL DEFAULT '/bin/bash',
    broker_id   TEXT NOT NULL DEFAULT '',
    locked      BOOLEAN NOT NULL DEFAULT FALSE
);

CREATE TABLE groups (
    name        TEXT NOT NULL UNIQUE,
    gid         INTEGER PRIMARY KEY,
    ugid        TEXT UNIQUE
);

CREATE TABLE users_to_groups (
    uid INTEGER NOT NULL,
    gid INTEGER NOT NULL,
    PRIMARY KEY (uid, gid),
    FOREIGN KEY (uid) REFERENCES users(uid) ON DELETE CASCADE,
    FOREIGN KEY (gid) REFERENCES groups(gid) ON DELETE CASCADE
);

CREATE TABLE users_to_local_groups (
    uid         INTEGER NOT NULL,
    group_name  TEXT NOT NULL,
    PRIMARY KEY (uid, group_name),
    FOREIGN KEY (uid) REFERENCES users(uid) ON DELETE CASCADE
);

CREATE TABLE schema_version (
    version INTEGER PRIMARY KEY
);

INSERT INTO schema_version (version) VALUES (0);
"#;
