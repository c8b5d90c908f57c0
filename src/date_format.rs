//! Serde helpers for the `YYYY-MM-DD` dates used by the JSON API.

time::serde::format_description!(pub iso_date, Date, "[year]-[month]-[day]");
