//! Hard bounds on client-controlled sizes.

/// Max calendars (pgwire databases) loaded in one process.
pub const MAX_TENANTS: usize = 1024;

/// Max calendar name length in bytes, before sanitisation.
pub const MAX_TENANT_NAME_LEN: usize = 64;

/// Max reservations stored per date, cancelled ones included.
pub const MAX_RESERVATIONS_PER_DAY: usize = 1024;

/// Max length of contact name, email and phone.
pub const MAX_CONTACT_FIELD_LEN: usize = 256;

/// Max length of the free-text booking message.
pub const MAX_MESSAGE_LEN: usize = 4096;

/// Max length of an externally provisioned meeting reference.
pub const MAX_MEETING_REF_LEN: usize = 2048;
