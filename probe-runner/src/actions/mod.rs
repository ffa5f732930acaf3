//! Instruction actions.
//!
//! Every action an instruction script may name is listed once in
//! [`ACTIONS`] with its declared arity. The table is loaded into a
//! [`Registry`] up front, so bad declarations fail before any test case
//! runs and arity is checked before a handler is ever invoked.

mod ops;
mod verify;

pub(crate) use ops::is_operation;

use probe_core::{ActionSpec, Registry, RegistryError};

/// A registered action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    // Lifecycle and seeding
    Seed,
    WaitSpiderDone,
    Save,
    Dump,
    Sleep,
    InstallFile,
    CustomConfig,
    ConfigCrawlDelay,
    ConfigDns,
    ConfigLog,

    // Document operations
    AddUrl,
    InjectUrl,
    InjectDocument,
    DeleteUrl,
    DocDelete,
    DocDeleteUrl,
    DocRebuild,
    DocRebuildUrl,
    DocReindex,
    DocReindexUrl,
    InsertTagDb,

    // Searches and assertions
    JustSearch,
    VerifyIndexed,
    VerifyNotIndexed,
    VerifySpidered,
    VerifyNotSpidered,
    VerifyOnlySpidered,
    VerifySearchResult,
    VerifySearchResultUrl,
    VerifySearchResultTitleSummary,
    VerifyQueryTerms,
    VerifyQueryLanguage,
    VerifySpiderRequest,
    VerifyNoSpiderRequest,
    VerifySpiderResponse,
    VerifyNoSpiderResponse,
    VerifyTitleRecord,
    VerifyNoTitleRecord,
    VerifyLinkdbRecord,
}

/// Every action, by instruction name.
pub const ACTIONS: &[(&str, ActionSpec, Action)] = &[
    ("seed", ActionSpec::any(), Action::Seed),
    ("wait_spider_done", ActionSpec::any(), Action::WaitSpiderDone),
    ("save", ActionSpec::exactly(0), Action::Save),
    ("dump", ActionSpec::exactly(0), Action::Dump),
    ("sleep", ActionSpec::exactly(1), Action::Sleep),
    ("installfile", ActionSpec::exactly(1), Action::InstallFile),
    ("custom_config", ActionSpec::pairs(), Action::CustomConfig),
    ("config_crawl_delay", ActionSpec::exactly(2), Action::ConfigCrawlDelay),
    ("config_dns", ActionSpec::between(1, 2), Action::ConfigDns),
    ("config_log", ActionSpec::between(1, 2), Action::ConfigLog),
    ("add_url", ActionSpec::at_least(1), Action::AddUrl),
    ("inject_url", ActionSpec::at_least(1), Action::InjectUrl),
    ("inject_document", ActionSpec::between(2, 3), Action::InjectDocument),
    ("delete_url", ActionSpec::at_least(1), Action::DeleteUrl),
    ("doc_delete", ActionSpec::exactly(1), Action::DocDelete),
    ("doc_delete_url", ActionSpec::exactly(1), Action::DocDeleteUrl),
    ("doc_rebuild", ActionSpec::exactly(1), Action::DocRebuild),
    ("doc_rebuild_url", ActionSpec::exactly(1), Action::DocRebuildUrl),
    ("doc_reindex", ActionSpec::exactly(1), Action::DocReindex),
    ("doc_reindex_url", ActionSpec::exactly(1), Action::DocReindexUrl),
    ("insert_tagdb", ActionSpec::exactly(3), Action::InsertTagDb),
    ("just_search", ActionSpec::any(), Action::JustSearch),
    ("verify_indexed", ActionSpec::any(), Action::VerifyIndexed),
    ("verify_not_indexed", ActionSpec::any(), Action::VerifyNotIndexed),
    ("verify_spidered", ActionSpec::any(), Action::VerifySpidered),
    ("verify_not_spidered", ActionSpec::any(), Action::VerifyNotSpidered),
    ("verify_only_spidered", ActionSpec::any(), Action::VerifyOnlySpidered),
    ("verify_search_result", ActionSpec::any(), Action::VerifySearchResult),
    ("verify_search_result_url", ActionSpec::any(), Action::VerifySearchResultUrl),
    (
        "verify_search_result_titlesummary",
        ActionSpec::any(),
        Action::VerifySearchResultTitleSummary,
    ),
    ("verify_query_terms", ActionSpec::any(), Action::VerifyQueryTerms),
    ("verify_query_language", ActionSpec::any(), Action::VerifyQueryLanguage),
    ("verify_spider_request", ActionSpec::any(), Action::VerifySpiderRequest),
    ("verify_no_spider_request", ActionSpec::any(), Action::VerifyNoSpiderRequest),
    ("verify_spider_response", ActionSpec::any(), Action::VerifySpiderResponse),
    ("verify_no_spider_response", ActionSpec::any(), Action::VerifyNoSpiderResponse),
    ("verify_title_record", ActionSpec::any(), Action::VerifyTitleRecord),
    ("verify_no_title_record", ActionSpec::any(), Action::VerifyNoTitleRecord),
    ("verify_linkdb_record", ActionSpec::any(), Action::VerifyLinkdbRecord),
];

impl Action {
    /// Instruction name of this action.
    pub fn name(self) -> &'static str {
        ACTIONS
            .iter()
            .find(|(_, _, action)| *action == self)
            .map_or("unknown", |(name, _, _)| name)
    }
}

/// Build the action registry.
pub fn registry() -> Result<Registry<Action>, RegistryError> {
    let mut registry = Registry::new();
    for (name, spec, action) in ACTIONS {
        registry.register(name, *spec, *action)?;
    }
    Ok(registry)
}

/// Search-result shapes sharing one literal grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResultShape {
    /// URLs, in any order.
    UnorderedUrls,
    /// URLs, positionally.
    Urls,
    /// `title|summary` pairs, positionally.
    TitleSummary,
    /// Parsed query terms, positionally.
    QueryTerms,
}

impl ResultShape {
    fn fields_per_result(self) -> usize {
        match self {
            ResultShape::TitleSummary => 2,
            _ => 1,
        }
    }
}

/// Which lookup a property-map action reads, and the marker field that
/// signals the record exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecordKind {
    SpiderRequest,
    SpiderReply,
    TitleRec,
}

impl RecordKind {
    fn marker(self) -> &'static str {
        match self {
            RecordKind::SpiderRequest => "spiderRequest",
            RecordKind::SpiderReply => "spiderReply",
            RecordKind::TitleRec => "titleRec",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use probe_core::instruction::parse_line;

    #[test]
    fn table_registers_cleanly() {
        let registry = registry().unwrap();
        assert_eq!(registry.len(), ACTIONS.len());
        assert!(registry.contains("verify_search_result_url"));
        assert!(!registry.contains("foobar"));
        assert_eq!(Action::VerifyOnlySpidered.name(), "verify_only_spidered");
    }

    #[test]
    fn unknown_action_resolves_to_none() {
        let registry = registry().unwrap();
        let instruction = parse_line("foobar arg1", 1).unwrap();
        assert_eq!(registry.resolve(&instruction).unwrap(), None);
    }

    #[test]
    fn arity_is_checked_before_dispatch() {
        let registry = registry().unwrap();
        assert!(registry.resolve(&parse_line("sleep", 1).unwrap()).is_err());
        assert!(registry.resolve(&parse_line("custom_config a b c", 1).unwrap()).is_err());
        assert_eq!(
            registry.resolve(&parse_line("custom_config a b", 1).unwrap()).unwrap(),
            Some(&Action::CustomConfig)
        );
    }

    #[test]
    fn pipe_literal_dispatches_to_action() {
        let registry = registry().unwrap();
        let instruction = parse_line("verify_search_result_url|q=test&n=2|2|http://x.example/1", 1).unwrap();
        assert_eq!(
            registry.resolve(&instruction).unwrap(),
            Some(&Action::VerifySearchResultUrl)
        );
        assert_eq!(instruction.joined_args(), "q=test&n=2|2|http://x.example/1");
    }
}
