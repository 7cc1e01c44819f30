// Same tables as schema.rs, with timestamps kept as RFC 3339 text.

diesel::table! {
    guild_configs (guild_id) {
        guild_id -> BigInt,
        settings -> Text,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    message_pairs (id) {
        id -> Integer,
        guild_id -> BigInt,
        original_channel_id -> BigInt,
        original_message_id -> BigInt,
        mirror_channel_id -> BigInt,
        mirror_message_id -> BigInt,
        created_at -> Text,
    }
}

diesel::allow_tables_to_appear_in_same_query!(guild_configs, message_pairs);
