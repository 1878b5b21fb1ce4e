//! SQLite schema definitions for the ledger database.

use crate::sqlite_column;
use crate::sqlite_persistence::{SqlType, Table, VersionedSchema};

// =============================================================================
// Version 1 - Item quantities and transaction log
// =============================================================================

const ITEMS_TABLE_V1: Table = Table {
    name: "items",
    columns: &[
        sqlite_column!("id", SqlType::Integer, is_primary_key = true),
        sqlite_column!("user_id", SqlType::Text, non_null = true),
        sqlite_column!("item_code", SqlType::Text, non_null = true),
        sqlite_column!(
            "quantity",
            SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
    ],
    indices: &[("idx_items_item_code", "item_code")],
    unique_constraints: &[&["user_id", "item_code"]],
};

const ITEM_TRANSACTIONS_TABLE_V1: Table = Table {
    name: "item_transactions",
    columns: &[
        sqlite_column!("id", SqlType::Integer, is_primary_key = true),
        sqlite_column!("user_id", SqlType::Text, non_null = true),
        sqlite_column!("item_code", SqlType::Text, non_null = true),
        sqlite_column!("delta", SqlType::Integer, non_null = true),
        sqlite_column!("reason", SqlType::Text, non_null = true),
        sqlite_column!("occurred_at", SqlType::Integer, non_null = true),
    ],
    indices: &[
        ("idx_item_transactions_occurred_at", "occurred_at"),
        ("idx_item_transactions_user", "user_id, item_code"),
    ],
    unique_constraints: &[],
};

// =============================================================================
// Version 2 - Key/value state
// =============================================================================

const COOP_STATE_TABLE_V2: Table = Table {
    name: "coop_state",
    columns: &[
        sqlite_column!("key", SqlType::Text, is_primary_key = true),
        sqlite_column!("value", SqlType::Text, non_null = true),
        sqlite_column!("updated_at", SqlType::Integer, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[],
};

fn migrate_v1_to_v2(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    COOP_STATE_TABLE_V2.create(conn)
}

/// Version 1: items + item_transactions
/// Version 2: coop_state
pub const LEDGER_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 1,
        tables: &[ITEMS_TABLE_V1, ITEM_TRANSACTIONS_TABLE_V1],
        migration: None,
    },
    VersionedSchema {
        version: 2,
        tables: &[
            ITEMS_TABLE_V1,
            ITEM_TRANSACTIONS_TABLE_V1,
            COOP_STATE_TABLE_V2,
        ],
        migration: Some(migrate_v1_to_v2),
    },
];
