//! secp256k1 Key Generation Utility
//!
//! Generates signer and proposer keys for the loyalty relay.
//!
//! ## Usage
//!
//! ```bash
//! # Generate three keys
//! cargo run --bin generate_keys -- 3
//! ```
//!
//! ## Output
//!
//! For each key, the hex private key and its Ethereum address. Put the private
//! keys, comma separated, in the env var named by `signer_keys_env` of each
//! chain (or `proposer_key_env` for the proposer), and fund the addresses.

use loyalty_relay::crypto;

fn main() {
    let count = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse::<usize>().ok())
        .unwrap_or(1);

    let mut private_keys = Vec::with_capacity(count);
    println!("Generated {} secp256k1 key(s):", count);
    for i in 0..count {
        let key = crypto::generate_key();
        let private_key = crypto::format_bytes(&key.to_bytes());
        println!("[{}] Address:     {}", i, crypto::format_address(&crypto::address_of(&key)));
        println!("[{}] Private Key: {}", i, private_key);
        private_keys.push(private_key);
    }
    println!();
    println!("Comma-separated private keys:");
    println!("{}", private_keys.join(","));
}
