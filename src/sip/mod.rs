pub mod builder;
pub mod message;
pub mod nat;
pub mod parse;

pub use message::{Header, Headers, Method, Request, Response, SipMessage};

pub const BRANCH_MAGIC: &str = "z9hG4bK";
pub const CALL_ID_LEN: usize = 32;
pub const BRANCH_LEN: usize = 32;
pub const TAG_LEN: usize = 16;

pub fn random_hex(count: usize) -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    (0..count)
        .map(|_| char::from_digit(rng.random_range(0..16u32), 16).unwrap_or('0'))
        .collect()
}

pub fn make_call_id(domain: &str) -> String {
    format!("{}@{}", random_hex(CALL_ID_LEN), domain)
}

pub fn make_branch() -> String {
    format!("{}{}", BRANCH_MAGIC, random_hex(BRANCH_LEN))
}

pub fn make_tag() -> String {
    random_hex(TAG_LEN)
}
