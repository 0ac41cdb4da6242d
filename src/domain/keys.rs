//! Stream/hash key naming (spec §6): `{SYM|TF}` hash-tags keep a symbol's
//! streams shardable onto the same broker partition.

pub fn tag(sym: &str, tf: &str) -> String {
    format!("{sym}|{tf}")
}

pub fn market_stream(sym: &str, tf: &str) -> String {
    format!("stream:market|{{{}}}", tag(sym, tf))
}

pub fn indicator_stream(sym: &str, tf: &str) -> String {
    format!("stream:ind|{{{}}}", tag(sym, tf))
}

pub fn signal_stream(sym: &str, tf: &str) -> String {
    format!("stream:signal|{{{}}}", tag(sym, tf))
}

pub fn snapshot_hash(sym: &str, tf: &str) -> String {
    format!("snap:ind|{{{}}}", tag(sym, tf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_hash_tagged_by_sym_and_tf() {
        assert_eq!(market_stream("BTCUSDT", "2m"), "stream:market|{BTCUSDT|2m}");
        assert_eq!(indicator_stream("BTCUSDT", "2m"), "stream:ind|{BTCUSDT|2m}");
        assert_eq!(signal_stream("BTCUSDT", "2m"), "stream:signal|{BTCUSDT|2m}");
        assert_eq!(snapshot_hash("BTCUSDT", "2m"), "snap:ind|{BTCUSDT|2m}");
    }
}
