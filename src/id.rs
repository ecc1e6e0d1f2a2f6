use chrono::Utc;
use rand::Rng;

/// Generate an identifier for messages and sessions.
///
/// Format is `<epoch-millis>-<nnn>`. The random suffix keeps ids apart when
/// several are minted within the same millisecond.
pub fn new_id() -> String {
    let millis = Utc::now().timestamp_millis();
    let suffix: u16 = rand::thread_rng().gen_range(0..1000);
    format!("{}-{:03}", millis, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn id_has_millis_and_padded_suffix() {
        let id = new_id();
        let (millis, suffix) = id.split_once('-').expect("separator");
        assert!(millis.parse::<i64>().is_ok());
        assert_eq!(suffix.len(), 3);
        assert!(suffix.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn rapid_ids_rarely_collide() {
        // A few dozen ids per burst is the interactive rate we care about.
        let ids: HashSet<String> = (0..40).map(|_| new_id()).collect();
        assert!(ids.len() >= 38);
    }
}
