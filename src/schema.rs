table! {
    files (id) {
        id -> Integer,
        save_id -> Integer,
        file_path -> Text,
        file_hash -> Binary,
        created_at -> Timestamp,
    }
}

table! {
    games (id) {
        id -> Integer,
        title -> Text,
        external_id -> Text,
    }
}

table! {
    saves (id) {
        id -> Integer,
        game_id -> Integer,
        source_path -> Text,
        backup_path -> Text,
        kind -> Text,
        created_at -> Timestamp,
    }
}

joinable!(files -> saves (save_id));
joinable!(saves -> games (game_id));

allow_tables_to_appear_in_same_query!(
    files,
    games,
    saves,
);
