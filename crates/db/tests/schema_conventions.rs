//! Structural rules the repositories depend on.

use lims_core::kind::EntityKind;
use lims_db::models::object::HEADER_COLUMNS;
use sqlx::PgPool;

#[derive(Debug, sqlx::FromRow)]
struct ForeignKey {
    table_name: String,
    column_name: String,
    referenced: String,
    /// `pg_constraint.confdeltype`: `a` no action, `r` restrict, `c` cascade.
    on_delete: String,
    indexed: bool,
}

/// Every row id is bigint, except the seeded lookup tables; every table is
/// stamped with timestamptz `created_at`/`modified_at` and uses TEXT for strings.
#[sqlx::test(migrations = "../../db/migrations")]
async fn test_ids_timestamps_and_text(pool: PgPool) {
    let tables: Vec<(String, Option<String>, Option<String>, Option<String>)> = sqlx::query_as(
        "SELECT t.table_name::text,
                (SELECT data_type::text FROM information_schema.columns c
                  WHERE c.table_schema = 'public' AND c.table_name = t.table_name
                    AND c.column_name = 'id'),
                (SELECT data_type::text FROM information_schema.columns c
                  WHERE c.table_schema = 'public' AND c.table_name = t.table_name
                    AND c.column_name = 'created_at'),
                (SELECT data_type::text FROM information_schema.columns c
                  WHERE c.table_schema = 'public' AND c.table_name = t.table_name
                    AND c.column_name = 'modified_at')
         FROM information_schema.tables t
         WHERE t.table_schema = 'public'
           AND t.table_type = 'BASE TABLE'
           AND t.table_name != '_sqlx_migrations'
         ORDER BY t.table_name",
    )
    .fetch_all(&pool)
    .await
    .unwrap();

    assert!(tables.len() >= 12, "Expected the full catalog schema, got {tables:?}");
    for (table, id, created, modified) in &tables {
        let expected_id = if table == "object_statuses" { "smallint" } else { "bigint" };
        assert_eq!(id.as_deref(), Some(expected_id), "{table}.id");
        assert_eq!(created.as_deref(), Some("timestamp with time zone"), "{table}.created_at");
        assert_eq!(modified.as_deref(), Some("timestamp with time zone"), "{table}.modified_at");
    }

    let varchar: i64 = sqlx::query_scalar(
        "SELECT count(*) FROM information_schema.columns
         WHERE table_schema = 'public' AND data_type = 'character varying'
           AND table_name != '_sqlx_migrations'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(varchar, 0, "String columns should be TEXT");
}

/// The four base tables carry every column the shared header model reads.
#[sqlx::test(migrations = "../../db/migrations")]
async fn test_base_tables_carry_the_object_header(pool: PgPool) {
    let header: Vec<&str> = HEADER_COLUMNS.split(',').map(str::trim).collect();
    assert!(header.contains(&"bbox_xmin"));

    for kind in EntityKind::BASE {
        let columns = columns_of(&pool, kind.table()).await;
        for column in &header {
            assert!(
                columns.iter().any(|c| c == column),
                "{} is missing header column {column}",
                kind.table()
            );
        }
        assert!(
            !columns.iter().any(|c| c == "xmin" || c == "xmax"),
            "{} shadows a system column",
            kind.table()
        );
    }
}

/// Each tag kind has its own table pointing at its owner kind, with the
/// `(object, key, id)` index the last-wins reads use.
#[sqlx::test(migrations = "../../db/migrations")]
async fn test_tag_tables_follow_their_owner(pool: PgPool) {
    let fks = foreign_keys(&pool).await;

    for kind in EntityKind::ALL.into_iter().filter(|k| k.is_tag()) {
        let table = kind.table();
        let owner = kind.owner().unwrap().table();

        let object = find_fk(&fks, table, "object_id");
        assert_eq!(object.referenced, owner, "{table}.object_id");
        assert_eq!(object.on_delete, "c", "Tags of {table} should go with their owner");

        let key = find_fk(&fks, table, "key_id");
        assert_eq!(key.referenced, "terms", "{table}.key_id");
        assert_eq!(key.on_delete, "r", "A Term in use as a key must not vanish");

        let has_lookup_index: bool = sqlx::query_scalar(
            "SELECT EXISTS (
                SELECT 1 FROM pg_indexes
                WHERE schemaname = 'public' AND tablename = $1
                  AND indexdef LIKE '%(object_id, key_id, id)%'
            )",
        )
        .bind(table)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert!(has_lookup_index, "{table} has no (object_id, key_id, id) index");
    }
}

/// Records inside a project are RESTRICT referents of it, so deleting a
/// project with contents surfaces as protected referents. Grants go with it.
#[sqlx::test(migrations = "../../db/migrations")]
async fn test_project_referents_are_protected(pool: PgPool) {
    let fks = foreign_keys(&pool).await;

    for table in ["samples", "attachments", "terms"] {
        let fk = find_fk(&fks, table, "project_id");
        assert_eq!(fk.referenced, "projects");
        assert_eq!(fk.on_delete, "r", "{table}.project_id");
    }
    for kind in EntityKind::BASE {
        let fk = find_fk(&fks, kind.table(), "parent_id");
        assert_eq!(fk.referenced, kind.table(), "Parents stay within one kind");
        assert_eq!(fk.on_delete, "a", "{}.parent_id", kind.table());
    }
    assert_eq!(find_fk(&fks, "project_permissions", "project_id").on_delete, "c");
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_every_foreign_key_is_indexed(pool: PgPool) {
    let fks = foreign_keys(&pool).await;
    assert!(!fks.is_empty());

    let missing: Vec<String> = fks
        .iter()
        .filter(|fk| !fk.indexed)
        .map(|fk| format!("{}.{}", fk.table_name, fk.column_name))
        .collect();
    assert!(missing.is_empty(), "Foreign keys without a leading index: {missing:?}");
}

/// Slug uniqueness constraints are named `uq_*slug*` so conflicts can be told
/// apart from other unique violations.
#[sqlx::test(migrations = "../../db/migrations")]
async fn test_slug_unique_indexes_are_named(pool: PgPool) {
    let rows: Vec<(String, String)> = sqlx::query_as(
        "SELECT tablename, indexname
         FROM pg_indexes
         WHERE schemaname = 'public'
           AND indexdef LIKE 'CREATE UNIQUE INDEX%'
           AND indexdef LIKE '%slug%'
         ORDER BY tablename",
    )
    .fetch_all(&pool)
    .await
    .unwrap();

    let tables: Vec<&str> = rows.iter().map(|(t, _)| t.as_str()).collect();
    for kind in EntityKind::BASE {
        assert!(tables.contains(&kind.table()), "{} has no unique slug index", kind.table());
    }
    for (table, index) in &rows {
        assert!(
            index.starts_with("uq_") && index.contains("slug"),
            "Unique slug index {index} on {table} should be named uq_*slug*"
        );
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn columns_of(pool: &PgPool, table: &str) -> Vec<String> {
    sqlx::query_scalar(
        "SELECT column_name::text FROM information_schema.columns
         WHERE table_schema = 'public' AND table_name = $1
         ORDER BY ordinal_position",
    )
    .bind(table)
    .fetch_all(pool)
    .await
    .unwrap()
}

/// Single-column foreign keys, with whether some index leads with the column.
async fn foreign_keys(pool: &PgPool) -> Vec<ForeignKey> {
    sqlx::query_as::<_, ForeignKey>(
        "SELECT c.conrelid::regclass::text AS table_name,
                a.attname::text AS column_name,
                c.confrelid::regclass::text AS referenced,
                c.confdeltype::text AS on_delete,
                EXISTS (
                    SELECT 1 FROM pg_index i
                    WHERE i.indrelid = c.conrelid AND i.indkey[0] = c.conkey[1]
                ) AS indexed
         FROM pg_constraint c
         JOIN pg_attribute a ON a.attrelid = c.conrelid AND a.attnum = c.conkey[1]
         WHERE c.contype = 'f'
           AND c.connamespace = 'public'::regnamespace
         ORDER BY 1, 2",
    )
    .fetch_all(pool)
    .await
    .unwrap()
}

fn find_fk<'a>(fks: &'a [ForeignKey], table: &str, column: &str) -> &'a ForeignKey {
    fks.iter()
        .find(|fk| fk.table_name == table && fk.column_name == column)
        .unwrap_or_else(|| panic!("No foreign key on {table}.{column}"))
}
