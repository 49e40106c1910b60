/// Max length of a customer name.
pub const MAX_NAME_LEN: usize = 200;

/// Max length of an email address (RFC 5321 path limit).
pub const MAX_EMAIL_LEN: usize = 254;

/// Max length of a phone number as submitted.
pub const MAX_PHONE_LEN: usize = 40;

/// Max number of services in a catalogue.
pub const MAX_SERVICES: usize = 256;

/// Max number of fixed slots in a day.
pub const MAX_SLOTS_PER_DAY: usize = 96;

/// Longest service a catalogue may define, in minutes.
pub const MAX_SERVICE_MINUTES: u32 = 24 * 60;

/// Bookings listed in the owner report's recent list.
pub const RECENT_BOOKINGS: usize = 5;
