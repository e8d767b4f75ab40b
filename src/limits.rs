//! Hard input limits enforced at the engine and auth boundaries.

/// Max length of booking notes, in characters.
pub const MAX_NOTES_LEN: usize = 500;

/// Max days covered by one availability range query (inclusive).
pub const MAX_RANGE_DAYS: i64 = 366;

pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

pub const MIN_USERNAME_LEN: usize = 3;
pub const MAX_USERNAME_LEN: usize = 50;
pub const MIN_PASSWORD_LEN: usize = 6;
pub const MAX_PASSWORD_LEN: usize = 256;
pub const MAX_EMAIL_LEN: usize = 254;
pub const MAX_PHONE_LEN: usize = 32;
