diesel::table! {
    wallets (id) {
        id -> Uuid,
        user_id -> Uuid,
        balance -> Float8,
        updated_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    wallet_transactions (id) {
        id -> Uuid,
        wallet_id -> Uuid,
        order_id -> Uuid,
        cost -> Float8,
        kind -> Varchar,
        created_at -> Nullable<Timestamptz>,
    }
}

diesel::allow_tables_to_appear_in_same_query!(wallets, wallet_transactions);
