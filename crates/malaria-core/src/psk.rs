// src/psk.rs
// PSK credential parsing (spec section 6): the "identity:hex_key" format
// shared by bridge auth strings and PSK key files. Shared between the
// worker pool (C5, which derives its process count from a key file's line
// count) and the bridge supervisor (C6, which renders a PSK config block
// and assigns one key per thread).

// PskCredentials carries an "id:key" pair parsed from an auth string or a
// key file line.
#[derive(Debug, Clone)]
pub struct PskCredentials {
    pub identity: String,
    pub key: String,
}

impl PskCredentials {
    // parse splits "id:key" on the first colon. Returns None for any input
    // without a colon.
    pub fn parse(auth: &str) -> Option<Self> {
        let (identity, key) = auth.split_once(':')?;
        Some(Self {
            identity: identity.to_string(),
            key: key.to_string(),
        })
    }

    pub fn to_auth_string(&self) -> String {
        format!("{}:{}", self.identity, self.key)
    }
}

// parse_keyfile reads one "identity:hex_key" credential per line (the
// format malaria's keygen command produces). Blank lines are skipped;
// lines without a colon are dropped rather than treated as fatal, since a
// key file is plain operator-maintained text, not a wire format.
pub fn parse_keyfile(contents: &str) -> Vec<PskCredentials> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(PskCredentials::parse)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn psk_parse_rejects_missing_colon() {
        assert!(PskCredentials::parse("no-colon-here").is_none());
    }

    #[test]
    fn psk_parse_splits_on_first_colon_only() {
        let psk = PskCredentials::parse("id:key:with:colons").unwrap();
        assert_eq!(psk.identity, "id");
        assert_eq!(psk.key, "key:with:colons");
    }

    #[test]
    fn parse_keyfile_reads_one_entry_per_line() {
        let keys = parse_keyfile("malaria-tlspsk-1:aaaa\nmalaria-tlspsk-2:bbbb\n");
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].identity, "malaria-tlspsk-1");
        assert_eq!(keys[1].key, "bbbb");
    }

    #[test]
    fn parse_keyfile_skips_blank_lines_and_bad_entries() {
        let keys = parse_keyfile("malaria-tlspsk-1:aaaa\n\nno-colon-here\n  \n");
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].identity, "malaria-tlspsk-1");
    }
}
