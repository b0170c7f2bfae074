//! Run tokens, run-scoped resource names, and the configcheck label set

use std::collections::BTreeMap;
use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use configcheck_common::kube_utils::{is_dns_label, label_selector};
use configcheck_common::{
    Error, LABEL_COMPONENT, LABEL_MANAGED_BY, LABEL_MANAGED_BY_CONFIGCHECK, LABEL_NAME,
};

/// Length of a run token
pub const TOKEN_LEN: usize = 5;

/// Prefix of every run-scoped object name
pub const NAME_PREFIX: &str = "configcheck";

/// Value of `app.kubernetes.io/name` on configcheck objects
pub const APP_NAME: &str = "vector-configcheck";

/// Value of `app.kubernetes.io/component` on configcheck objects
pub const COMPONENT: &str = "ConfigCheck";

/// Label carrying the run token
pub const LABEL_RUN: &str = "configcheck.io/run";

/// Label carrying the name of the validated subject
pub const LABEL_SUBJECT: &str = "configcheck.io/subject";

const TOKEN_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

/// Short random token identifying one validation run
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RunToken(String);

impl RunToken {
    /// Generate a fresh token
    ///
    /// Each call seeds its own generator from OS entropy, so concurrent runs
    /// share no random state.
    pub fn generate() -> Self {
        let mut rng = StdRng::from_entropy();
        let token = (0..TOKEN_LEN)
            .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
            .collect();
        Self(token)
    }

    /// Wrap an existing token, e.g. one read back from a label
    pub fn from_string(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The token text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Names of every object a run may create
///
/// All three share one run-scoped name; they live in different API kinds so
/// they never clash with each other.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunNames {
    /// Namespace all run objects live in
    pub namespace: String,
    /// Name of the validated subject
    pub subject: String,
    /// Token of this run
    pub token: RunToken,
    /// ServiceAccount the validator pod runs as
    pub service_account: String,
    /// Secret holding the candidate configuration
    pub config_secret: String,
    /// Validator pod
    pub pod: String,
}

impl RunNames {
    /// Derive the run's object names
    ///
    /// Fails if the subject cannot be part of a Kubernetes object name.
    pub fn new(subject: &str, namespace: &str, token: RunToken) -> Result<Self, Error> {
        if !is_dns_label(subject) {
            return Err(Error::validation_for(
                subject,
                "subject name must be a lowercase RFC 1123 label",
            ));
        }
        if namespace.is_empty() {
            return Err(Error::validation_for(subject, "namespace must not be empty"));
        }
        let name = format!("{}-{}-{}", NAME_PREFIX, subject, token);
        Ok(Self {
            namespace: namespace.to_string(),
            subject: subject.to_string(),
            token,
            service_account: name.clone(),
            config_secret: name.clone(),
            pod: name,
        })
    }

    /// Labels stamped on every object of this run
    pub fn labels(&self) -> BTreeMap<String, String> {
        let mut labels = common_labels();
        labels.insert(LABEL_RUN.to_string(), self.token.to_string());
        labels.insert(LABEL_SUBJECT.to_string(), self.subject.clone());
        labels
    }
}

/// Labels shared by the objects of every run
pub fn common_labels() -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            LABEL_MANAGED_BY.to_string(),
            LABEL_MANAGED_BY_CONFIGCHECK.to_string(),
        ),
        (LABEL_NAME.to_string(), APP_NAME.to_string()),
        (LABEL_COMPONENT.to_string(), COMPONENT.to_string()),
    ])
}

/// Selector matching the objects of every run
pub fn common_label_selector() -> String {
    label_selector(&common_labels())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_token_shape() {
        for _ in 0..100 {
            let token = RunToken::generate();
            assert_eq!(token.as_str().len(), TOKEN_LEN);
            assert!(token.as_str().bytes().all(|b| b.is_ascii_lowercase()));
        }
    }

    #[test]
    fn test_tokens_vary() {
        let tokens: HashSet<_> = (0..50).map(|_| RunToken::generate()).collect();
        // 26^5 possibilities; 50 draws colliding down to a handful would mean a broken rng
        assert!(tokens.len() > 45);
    }

    #[test]
    fn test_names_are_run_scoped() {
        let names = RunNames::new("agent", "observability", RunToken::from_string("abcde"))
            .expect("valid subject");
        assert_eq!(names.pod, "configcheck-agent-abcde");
        assert_eq!(names.config_secret, "configcheck-agent-abcde");
        assert_eq!(names.service_account, "configcheck-agent-abcde");
        assert_eq!(names.namespace, "observability");
    }

    /// Story: two runs for the same subject never touch each other's objects
    ///
    /// Concurrent validations of one agent differ only in their tokens; every
    /// derived name and the run label must differ as well.
    #[test]
    fn story_concurrent_runs_for_same_subject_are_disjoint() {
        let a = RunNames::new("agent", "ns", RunToken::from_string("aaaaa")).expect("valid");
        let b = RunNames::new("agent", "ns", RunToken::from_string("bbbbb")).expect("valid");

        let names_a: HashSet<_> = [&a.pod, &a.config_secret, &a.service_account]
            .into_iter()
            .collect();
        let names_b: HashSet<_> = [&b.pod, &b.config_secret, &b.service_account]
            .into_iter()
            .collect();
        assert!(names_a.is_disjoint(&names_b));
        assert_ne!(a.labels().get(LABEL_RUN), b.labels().get(LABEL_RUN));
    }

    /// Story: subjects whose names overlap as prefixes still get distinct names
    #[test]
    fn story_overlapping_subject_names_stay_disjoint() {
        let short = RunNames::new("agent", "ns", RunToken::from_string("xaaaa")).expect("valid");
        let long = RunNames::new("agent-x", "ns", RunToken::from_string("aaaaa")).expect("valid");
        assert_ne!(short.pod, long.pod);
        assert_ne!(short.labels(), long.labels());
    }

    #[test]
    fn test_invalid_subject_rejected() {
        assert!(RunNames::new("Agent", "ns", RunToken::generate()).is_err());
        assert!(RunNames::new("", "ns", RunToken::generate()).is_err());
        assert!(RunNames::new("agent", "", RunToken::generate()).is_err());
    }

    #[test]
    fn test_labels_include_common_set() {
        let names = RunNames::new("agent", "ns", RunToken::from_string("abcde")).expect("valid");
        let labels = names.labels();
        for (k, v) in common_labels() {
            assert_eq!(labels.get(&k), Some(&v));
        }
        assert_eq!(labels.get(LABEL_SUBJECT).map(String::as_str), Some("agent"));
        assert_eq!(labels.get(LABEL_RUN).map(String::as_str), Some("abcde"));
    }

    #[test]
    fn test_common_label_selector() {
        assert_eq!(
            common_label_selector(),
            "app.kubernetes.io/component=ConfigCheck,\
             app.kubernetes.io/managed-by=configcheck,\
             app.kubernetes.io/name=vector-configcheck"
        );
    }
}
