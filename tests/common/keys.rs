use causal_pipeline::types::data_types::FeedKey;
use ed25519_dalek::SigningKey;
use rand_core::OsRng;

/// Generate the feed keys of `n` peers, in ascending order.
pub(crate) fn sorted_feed_keys(n: usize) -> Vec<FeedKey> {
    let mut csprg = OsRng {};
    let mut feed_keys: Vec<FeedKey> = (0..n)
        .map(|_| FeedKey::from(SigningKey::generate(&mut csprg).verifying_key()))
        .collect();
    feed_keys.sort();
    feed_keys
}
