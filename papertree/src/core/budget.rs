//! Word budget derivation for leaf prose.

/// Half of the target goes to body text; the rest is headroom.
pub fn halved_word_count(word_count: u32) -> u32 {
    word_count / 2
}

/// Share of the body each leaf receives in a `fanout` x `fanout` tree.
pub fn leaf_share(fanout: usize) -> f64 {
    (1.0 / fanout as f64).powi(2)
}

/// Minimum words requested from every leaf, truncated toward zero.
pub fn leaf_min_words(word_count: u32, fanout: usize) -> u32 {
    (leaf_share(fanout) * f64::from(halved_word_count(word_count))) as u32
}
