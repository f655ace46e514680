//! Sender identity rotation

use super::error::ControlError;
use relaypost_common::SenderIdentity;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Round-robin over sender identities with its own cursor.
/// Identities are never disabled.
pub struct IdentityRotator {
    identities: Vec<SenderIdentity>,
    cursor: AtomicUsize,
}

impl IdentityRotator {
    pub fn new(identities: Vec<SenderIdentity>) -> Self {
        Self {
            identities,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn next(&self) -> Result<SenderIdentity, ControlError> {
        if self.identities.is_empty() {
            return Err(ControlError::EmptyIdentityPool);
        }
        let index = self.cursor.fetch_add(1, Ordering::SeqCst) % self.identities.len();
        Ok(self.identities[index].clone())
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[test]
    fn test_cycles_in_order() {
        let rotator = IdentityRotator::new(vec![
            SenderIdentity::new("a@x.com"),
            SenderIdentity::new("b@x.com"),
        ]);

        let picked: Vec<String> = (0..5)
            .map(|_| rotator.next().unwrap().address)
            .collect();
        assert_eq!(picked, vec!["a@x.com", "b@x.com", "a@x.com", "b@x.com", "a@x.com"]);
    }

    #[test]
    fn test_empty_rotator() {
        let rotator = IdentityRotator::new(Vec::new());
        assert!(matches!(rotator.next(), Err(ControlError::EmptyIdentityPool)));
    }

    #[tokio::test]
    async fn test_concurrent_advance_is_even() {
        let rotator = Arc::new(IdentityRotator::new(vec![
            SenderIdentity::new("a@x.com"),
            SenderIdentity::new("b@x.com"),
            SenderIdentity::new("c@x.com"),
            SenderIdentity::new("d@x.com"),
        ]));

        let mut handles = Vec::new();
        for _ in 0..40 {
            let rotator = rotator.clone();
            handles.push(tokio::spawn(async move { rotator.next().unwrap().address }));
        }

        let mut counts: HashMap<String, usize> = HashMap::new();
        for handle in handles {
            *counts.entry(handle.await.unwrap()).or_default() += 1;
        }
        assert!(counts.values().all(|c| *c == 10));
    }
}
