diesel::table! {
    stock_items (id) {
        id -> Uuid,
        product_id -> Uuid,
        count -> Int4,
        updated_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    stock_transactions (id) {
        id -> Uuid,
        order_id -> Uuid,
        kind -> Varchar,
        created_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    stock_transaction_items (id) {
        id -> Uuid,
        transaction_id -> Uuid,
        product_id -> Uuid,
        count -> Int4,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    stock_items,
    stock_transactions,
    stock_transaction_items,
);
