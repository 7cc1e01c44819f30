diesel::table! {
    guild_configs (guild_id) {
        guild_id -> BigInt,
        settings -> Text,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    message_pairs (id) {
        id -> BigInt,
        guild_id -> BigInt,
        original_channel_id -> BigInt,
        original_message_id -> BigInt,
        mirror_channel_id -> BigInt,
        mirror_message_id -> BigInt,
        created_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(guild_configs, message_pairs);
