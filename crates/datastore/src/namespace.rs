//! Per-commit namespace journals, consulted by the commit protocol's
//! namespace-clash check.

use rdbcore_primitives::CommitId;

/// One committed transaction's effect on the table-name namespace.
#[derive(Clone, Debug)]
pub struct NamespaceJournal {
    pub commit_id: CommitId,
    pub created_names: Vec<String>,
    pub dropped_names: Vec<String>,
}

impl NamespaceJournal {
    /// Whether `this_txn`'s own created/dropped name sets collide with
    /// this journal's.
    pub fn clashes_with(&self, created: &[String], dropped: &[String]) -> Option<String> {
        created
            .iter()
            .find(|name| self.created_names.iter().any(|n| n == *name))
            .or_else(|| dropped.iter().find(|name| self.dropped_names.iter().any(|n| n == *name)))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_a_created_name_clash() {
        let journal = NamespaceJournal {
            commit_id: CommitId::new(10),
            created_names: vec!["public.foo".to_owned()],
            dropped_names: vec![],
        };
        assert_eq!(
            journal.clashes_with(&["public.foo".to_owned()], &[]),
            Some("public.foo".to_owned())
        );
        assert_eq!(journal.clashes_with(&["public.bar".to_owned()], &[]), None);
    }
}
