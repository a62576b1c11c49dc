// Diesel schema definition for the license database
use diesel::{allow_tables_to_appear_in_same_query, joinable, table};

table! {
    licenses (id) {
        id -> Integer,
        owner -> Nullable<Text>,
        client_id -> Text,
        license_key -> Text,
        acquired_at -> BigInt,
        contact -> Nullable<Text>,
        last_login_at -> Nullable<BigInt>,
        last_login_ip -> Nullable<Text>,
        last_login_mac -> Nullable<Text>,
        anomaly_counter -> Integer,
        tool -> Nullable<Text>,
        expires_at -> Nullable<BigInt>,
        client_version -> Nullable<Text>,
    }
}

table! {
    anomaly_logs (id) {
        id -> Integer,
        license_id -> Nullable<Integer>,
        created_at -> BigInt,
        message -> Text,
    }
}

table! {
    tool_updates (id) {
        id -> Integer,
        tool -> Text,
        version -> Text,
        download_count -> Integer,
        last_download_at -> Nullable<BigInt>,
        update_url -> Text,
    }
}

joinable!(anomaly_logs -> licenses (license_id));

allow_tables_to_appear_in_same_query!(
    licenses,
    anomaly_logs,
    tool_updates,
);
