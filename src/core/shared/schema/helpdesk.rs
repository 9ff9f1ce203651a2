diesel::table! {
    tickets (id) {
        id -> Uuid,
        subject -> Varchar,
        body -> Text,
        status -> Varchar,
        category -> Nullable<Varchar>,
        explanation -> Nullable<Text>,
        confidence -> Nullable<Numeric>,
        note -> Nullable<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}
