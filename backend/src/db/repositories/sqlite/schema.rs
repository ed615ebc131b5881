diesel::table! {
    results (key) {
        key -> Text,
        data -> Text,
        timestamp -> Timestamp,
    }
}
