// SKDP Cryptographic Core
// Primitive bindings: Keccak family, AEAD record ciphers, entropy.

pub mod cipher;
pub mod keccak;
pub mod random;

pub use cipher::SessionCipher;
