//! End-to-end pipeline tests with mocked external backends: set up the
//! fake scrapers/LLM/CRM/registry, run the real runner or batch driver,
//! assert on the terminal Run.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use prospect_common::{
    Company, DataType, ErrorCategory, FieldMapping, FieldRegistry, PhaseName, PhaseStatus,
    PipelineOptions, Question, RunStatus, Tier, Tier3Gate, ValidationStatus,
};
use prospect_pipeline::batch::BatchDriver;
use prospect_pipeline::registry::Registry;
use prospect_pipeline::runner::{PipelineDeps, PipelineRunner};
use prospect_pipeline::scrape::ScrapeChain;
use prospect_pipeline::testing::{MockCrm, MockLeadPage, MockLlm, MockRegistry, StubFetcher};
use prospect_pipeline::traits::PageFetcher;
use prospect_store::{MemoryStore, RunStore};

// --- fixtures ---

fn question(id: &str, tier: Tier, field_key: &str) -> Question {
    Question {
        id: id.into(),
        text: format!("What is the company's {field_key}?"),
        tier,
        field_key: field_key.into(),
        page_types: vec!["homepage".into()],
        instructions: None,
        output_format: None,
        active: true,
    }
}

fn field(key: &str, destination: &str, data_type: DataType, required: bool) -> FieldMapping {
    FieldMapping {
        key: key.into(),
        destination_field: destination.into(),
        destination_object: "Account".into(),
        data_type,
        required,
        max_length: if data_type == DataType::String {
            Some(100)
        } else {
            None
        },
        validation: None,
        active: true,
    }
}

fn catalog() -> (Vec<Question>, Vec<FieldMapping>) {
    (
        vec![
            question("q1", Tier::One, "industry"),
            question("q2", Tier::One, "employee_count"),
        ],
        vec![
            field("industry", "Industry", DataType::String, true),
            field("employee_count", "NumberOfEmployees", DataType::Number, false),
        ],
    )
}

struct Harness {
    deps: Arc<PipelineDeps>,
    store: Arc<MemoryStore>,
    crm: Arc<MockCrm>,
    registry: Arc<MockRegistry>,
}

fn harness(
    adapters: Vec<Arc<dyn PageFetcher>>,
    llm: MockLlm,
    crm: MockCrm,
    registry: MockRegistry,
    questions: Vec<Question>,
    fields: Vec<FieldMapping>,
) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let crm = Arc::new(crm);
    let registry = Arc::new(registry);
    let deps = Arc::new(PipelineDeps {
        chain: Arc::new(ScrapeChain::new(adapters, &[])),
        llm: Arc::new(llm),
        crm: Some(crm.clone()),
        lead_registry: Some(registry.clone()),
        catalogs: Arc::new(Registry {
            questions,
            fields: FieldRegistry::new(fields),
        }),
        store: store.clone(),
        options: PipelineOptions {
            escalation_threshold: 0.4,
            skip_confidence_threshold: 0.8,
            quality_score_threshold: 0.5,
            tier3_gate: Tier3Gate::Never,
            max_cost_per_company: 0.0,
        },
        cancelled: Arc::new(AtomicBool::new(false)),
    });
    Harness {
        deps,
        store,
        crm,
        registry,
    }
}

fn acme() -> Company {
    Company {
        lead_id: "lead-1".into(),
        name: "Acme".into(),
        url: "https://acme.com".into(),
        salesforce_id: Some("001xx0000001".into()),
        location: None,
    }
}

// --- S1: happy path ---

#[tokio::test]
async fn happy_path_completes_with_valid_fields() {
    let (questions, fields) = catalog();
    let h = harness(
        vec![Arc::new(StubFetcher::text(
            "jina",
            "Acme builds widgets. 120 employees.",
        ))],
        MockLlm::new()
            .answer_json("q1", "widgets", 0.9)
            .answer_json("q2", "120", 0.9),
        MockCrm::new(),
        MockRegistry::new(),
        questions,
        fields,
    );

    let run = PipelineRunner::new(h.deps).run(acme()).await.unwrap();

    assert_eq!(run.status, RunStatus::Complete);
    assert!((run.score - 0.9).abs() < 1e-9);
    assert!(!run.low_quality);

    let valid: Vec<_> = run
        .field_values
        .iter()
        .filter(|v| v.status == ValidationStatus::Valid)
        .collect();
    assert_eq!(valid.len(), 2);
    assert!(run.field_values.iter().any(|v| v.value == "widgets"));
    assert!(run.field_values.iter().any(|v| v.value == "120"));

    // The stored record matches the returned one.
    let stored = h.store.get_run(run.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Complete);
}

#[tokio::test]
async fn totals_equal_phase_sums_and_tiers_respect_declarations() {
    let (questions, fields) = catalog();
    let h = harness(
        vec![Arc::new(StubFetcher::text("jina", "Acme builds widgets."))],
        MockLlm::new()
            .answer_json("q1", "widgets", 0.9)
            .answer_json("q2", "120", 0.9),
        MockCrm::new(),
        MockRegistry::new(),
        questions.clone(),
        fields,
    );

    let run = PipelineRunner::new(h.deps).run(acme()).await.unwrap();

    let phase_tokens: u64 = run.phases.iter().map(|p| p.usage.total_tokens()).sum();
    let phase_cost: f64 = run.phases.iter().map(|p| p.usage.cost_usd).sum();
    assert_eq!(phase_tokens, run.total_tokens);
    assert!((phase_cost - run.total_cost_usd).abs() < 1e-9);

    for answer in &run.answers {
        let declared = questions
            .iter()
            .find(|q| q.id == answer.question_id)
            .unwrap()
            .tier;
        assert!(answer.tier >= declared);
    }
}

// --- S2: tier escalation ---

#[tokio::test]
async fn low_confidence_answer_escalates_to_tier_two() {
    let (questions, fields) = catalog();
    let h = harness(
        vec![Arc::new(StubFetcher::text("jina", "Acme builds widgets."))],
        MockLlm::new()
            .answer_json_at(Tier::One, "q1", "", 0.1)
            .answer_json_at(Tier::Two, "q1", "industrial tools", 0.8)
            .answer_json("q2", "120", 0.9),
        MockCrm::new(),
        MockRegistry::new(),
        questions,
        fields,
    );

    let run = PipelineRunner::new(h.deps).run(acme()).await.unwrap();

    assert_eq!(run.status, RunStatus::Complete);
    let industry = run
        .final_answers()
        .find(|a| a.field_key == "industry")
        .unwrap();
    assert_eq!(industry.tier, Tier::Two);
    assert_eq!(industry.value, "industrial tools");
}

// --- S3: transient scrape failure recovers through the chain ---

#[tokio::test]
async fn scrape_fallback_rescues_data_collection() {
    let (questions, fields) = catalog();
    let h = harness(
        vec![
            Arc::new(StubFetcher::empty("cache")),
            Arc::new(StubFetcher::fail("jina", 429)),
            Arc::new(StubFetcher::text(
                "firecrawl",
                "Acme builds widgets. 120 employees.",
            )),
        ],
        MockLlm::new()
            .answer_json("q1", "widgets", 0.9)
            .answer_json("q2", "120", 0.9),
        MockCrm::new(),
        MockRegistry::new(),
        questions,
        fields,
    );

    let run = PipelineRunner::new(h.deps).run(acme()).await.unwrap();

    assert_eq!(run.status, RunStatus::Complete);
    let collection = run
        .phases
        .iter()
        .find(|p| p.name == PhaseName::DataCollection)
        .unwrap();
    assert_eq!(collection.status, PhaseStatus::Success);
}

// --- S4: every scraper fails transiently ---

#[tokio::test]
async fn exhausted_scrape_chain_fails_run_transiently() {
    let (questions, fields) = catalog();
    let h = harness(
        vec![
            Arc::new(StubFetcher::fail("jina", 503)),
            Arc::new(StubFetcher::fail("firecrawl", 502)),
        ],
        MockLlm::new(),
        MockCrm::new(),
        MockRegistry::new(),
        questions,
        fields,
    );

    let run = PipelineRunner::new(h.deps).run(acme()).await.unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    let error = run.error.as_ref().unwrap();
    assert_eq!(error.category, ErrorCategory::Transient);
    assert_eq!(error.failed_phase, PhaseName::DataCollection);
}

// --- S5: batch isolation ---

#[tokio::test]
async fn batch_isolates_one_permanent_failure() {
    let questions = vec![question("q1", Tier::One, "industry")];
    let mut industry = field("industry", "Industry", DataType::String, true);
    industry.validation = Some(r"^[A-Za-z ]+$".into());

    let h = harness(
        vec![Arc::new(
            StubFetcher::text("jina", "Acme builds widgets.")
                .on("https://beta.io", "Beta Industries report 2024"),
        )],
        MockLlm::new()
            .answer_json_when("Beta Industries", "q1", "123", 0.9)
            .answer_json("q1", "widgets", 0.9),
        MockCrm::new(),
        MockRegistry::new(),
        questions,
        vec![industry],
    );

    let leads = vec![
        Company::new("l1", "Acme", "https://acme.com"),
        Company::new("l2", "Beta", "https://beta.io"),
        Company::new("l3", "Gamma", "https://gamma.co"),
    ];

    let report = BatchDriver::new(h.deps, 2).run(leads).await;

    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.succeeded + report.failed, 3);
    assert_eq!(report.stats.permanent_failures, 1);

    // The failed company's run records the validation phase as the culprit.
    let failed = h
        .store
        .list_runs(&prospect_store::RunFilter {
            status: Some(RunStatus::Failed),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].company.url, "https://beta.io");
    assert_eq!(
        failed[0].error.as_ref().unwrap().failed_phase,
        PhaseName::Validation
    );
}

// --- S6: idempotent write-back ---

#[tokio::test]
async fn second_identical_run_performs_zero_writes() {
    let (questions, fields) = catalog();
    let h = harness(
        vec![Arc::new(StubFetcher::text(
            "jina",
            "Acme builds widgets. 120 employees.",
        ))],
        MockLlm::new()
            .answer_json("q1", "widgets", 0.9)
            .answer_json("q2", "120", 0.9),
        MockCrm::new(),
        MockRegistry::new().with_page(
            "lead-1",
            MockLeadPage {
                status: "Queued".into(),
                fields: HashMap::new(),
            },
        ),
        questions,
        fields,
    );

    let runner = PipelineRunner::new(h.deps);

    let first = runner.run(acme()).await.unwrap();
    assert_eq!(first.status, RunStatus::Complete);
    assert_eq!(h.crm.update_call_count(), 1);
    let page = h.registry.page("lead-1").unwrap();
    assert_eq!(page.status, "Completed");
    assert_eq!(page.fields.get("Industry").unwrap(), "widgets");
    let writes_after_first = h.registry.write_call_count();

    let second = runner.run(acme()).await.unwrap();
    assert_eq!(second.status, RunStatus::Complete);
    // Same values, so no CRM update and no registry write.
    assert_eq!(h.crm.update_call_count(), 1);
    assert_eq!(h.registry.write_call_count(), writes_after_first);

    // Both runs exist; re-running never mutates the prior record.
    assert_ne!(first.id, second.id);
    let prior = h.store.get_run(first.id).await.unwrap().unwrap();
    assert_eq!(prior.status, RunStatus::Complete);
}

// --- write-back skip without destinations ---

#[tokio::test]
async fn write_back_skipped_without_crm_id_or_lead_page() {
    let (questions, fields) = catalog();
    let h = harness(
        vec![Arc::new(StubFetcher::text("jina", "Acme builds widgets."))],
        MockLlm::new()
            .answer_json("q1", "widgets", 0.9)
            .answer_json("q2", "120", 0.9),
        MockCrm::new(),
        MockRegistry::new(),
        questions,
        fields,
    );

    let company = Company::new("", "Acme", "https://acme.com");
    let run = PipelineRunner::new(h.deps).run(company).await.unwrap();

    assert_eq!(run.status, RunStatus::Complete);
    let write_back = run
        .phases
        .iter()
        .find(|p| p.name == PhaseName::WriteBack)
        .unwrap();
    assert_eq!(write_back.status, PhaseStatus::Skipped);
    assert_eq!(h.crm.update_call_count(), 0);
}

// --- cancellation ---

#[tokio::test]
async fn cancelled_batch_dispatches_no_new_leads() {
    let (questions, fields) = catalog();
    let llm = Arc::new(
        MockLlm::new()
            .answer_json("q1", "widgets", 0.9)
            .answer_json("q2", "120", 0.9),
    );
    let store = Arc::new(MemoryStore::new());
    let deps = Arc::new(PipelineDeps {
        chain: Arc::new(ScrapeChain::new(
            vec![Arc::new(StubFetcher::text("jina", "Acme builds widgets."))],
            &[],
        )),
        llm: llm.clone(),
        crm: None,
        lead_registry: None,
        catalogs: Arc::new(Registry {
            questions,
            fields: FieldRegistry::new(fields),
        }),
        store: store.clone(),
        options: PipelineOptions::default(),
        cancelled: Arc::new(AtomicBool::new(false)),
    });
    deps.cancelled.store(true, Ordering::Relaxed);

    let leads = vec![
        Company::new("l1", "Acme", "https://acme.com"),
        Company::new("l2", "Beta", "https://beta.io"),
        Company::new("l3", "Gamma", "https://gamma.co"),
    ];

    let report = BatchDriver::new(deps, 2).run(leads).await;

    // Every lead is accounted for, but none was dispatched: no run rows
    // were created and the LLM was never called.
    assert_eq!(report.succeeded, 0);
    assert_eq!(report.failed, 3);
    assert_eq!(report.succeeded + report.failed, 3);
    let runs = store.list_runs(&Default::default()).await.unwrap();
    assert!(runs.is_empty());
    assert_eq!(llm.calls_at(Tier::One), 0);
}

#[tokio::test]
async fn cancelled_run_fails_transiently_at_current_phase() {
    let (questions, fields) = catalog();
    let h = harness(
        vec![Arc::new(StubFetcher::text("jina", "Acme builds widgets."))],
        MockLlm::new().answer_json("q1", "widgets", 0.9),
        MockCrm::new(),
        MockRegistry::new(),
        questions,
        fields,
    );
    h.deps.cancelled.store(true, Ordering::Relaxed);

    let run = PipelineRunner::new(h.deps).run(acme()).await.unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    let error = run.error.as_ref().unwrap();
    assert_eq!(error.category, ErrorCategory::Transient);
    assert_eq!(error.failed_phase, PhaseName::DataCollection);
}

// --- classification is recorded, skipped or run ---

#[tokio::test]
async fn classification_phase_is_recorded_when_skipped() {
    let (questions, fields) = catalog();
    let h = harness(
        vec![Arc::new(StubFetcher::text("jina", "Acme builds widgets."))],
        MockLlm::new()
            .answer_json("q1", "widgets", 0.9)
            .answer_json("q2", "120", 0.9),
        MockCrm::new(),
        MockRegistry::new(),
        questions,
        fields,
    );

    let run = PipelineRunner::new(h.deps).run(acme()).await.unwrap();

    let classification = run
        .phases
        .iter()
        .find(|p| p.name == PhaseName::Classification)
        .unwrap();
    assert_eq!(classification.status, PhaseStatus::Skipped);
    assert_eq!(run.phases.len(), 6);
}

#[tokio::test]
async fn ambiguous_page_goes_through_classification() {
    // "about" and "company" share the /about path, so that page has two
    // candidates and needs the classifier.
    let mut q = question("q1", Tier::One, "industry");
    q.page_types = vec!["about".into(), "company".into()];
    let fields = vec![field("industry", "Industry", DataType::String, true)];

    let h = harness(
        vec![Arc::new(
            StubFetcher::text("jina", "Acme homepage")
                .on("https://acme.com/about", "About Acme: widgets since 1949."),
        )],
        MockLlm::new()
            .answer_json("q1", "widgets", 0.9)
            .classify_reply("about"),
        MockCrm::new(),
        MockRegistry::new(),
        vec![q],
        fields,
    );

    let run = PipelineRunner::new(h.deps).run(acme()).await.unwrap();

    assert_eq!(run.status, RunStatus::Complete);
    let classification = run
        .phases
        .iter()
        .find(|p| p.name == PhaseName::Classification)
        .unwrap();
    assert_eq!(classification.status, PhaseStatus::Success);
}
