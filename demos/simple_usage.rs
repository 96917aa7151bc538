/// Instant-search walkthrough:
/// - declare a schema and create an indexer
/// - add records with searchable and refining attributes
/// - exact, prefix and fuzzy search
/// - facets, filters, suggestions, feedback

use std::sync::Arc;
use searchlet::{
    AttributeFilter, FacetRequest, Indexer, IndexerConfig, LogicalPlan, Record, RefiningType,
    RefiningValue, Schema, StandardAnalyzer, TermSpec, TermType,
};
use searchlet::query::filter::FilterQuery;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let schema = Schema::new("id")
        .add_searchable("title", 2.0)
        .add_searchable("body", 1.0)
        .add_refining("year", RefiningType::Int, RefiningValue::Int(0))
        .add_refining("genre", RefiningType::Text, RefiningValue::Text(String::new()));

    let indexer = Indexer::create(
        schema,
        Arc::new(StandardAnalyzer::default()),
        IndexerConfig::default(),
    )?;

    let albums = [
        ("dsotm", "The Dark Side of the Moon", "pink floyd progressive", 1973, "rock"),
        ("wall", "The Wall", "pink floyd concept album", 1979, "rock"),
        ("kind", "Kind of Blue", "miles davis modal jazz", 1959, "jazz"),
        ("trane", "A Love Supreme", "john coltrane spiritual jazz", 1965, "jazz"),
    ];
    for (id, title, body, year, genre) in albums {
        let mut record = Record::new(id);
        record.set_searchable("title", title);
        record.set_searchable("body", body);
        record.set_refining("year", RefiningValue::Int(year));
        record.set_refining("genre", RefiningValue::Text(genre.to_string()));
        indexer.add_record(&record)?;
    }
    indexer.commit()?;

    // Instant search: the last word matches as a prefix, typos allowed.
    let plan = LogicalPlan::from_keywords(&["pink", "flo"], 10, 2);
    let results = indexer.search(&plan)?;
    println!("'pink flo' -> {:?}", results.external_ids());

    // A misspelled query still finds its records.
    let plan = LogicalPlan::from_keywords(&["pynk"], 10, 2);
    let results = indexer.search(&plan)?;
    println!("'pynk'     -> {:?}", results.external_ids());

    // Facets and filters over refining attributes.
    let mut plan = LogicalPlan::new(10);
    let term = plan.term(TermSpec {
        keyword: "jazz".into(),
        term_type: TermType::Complete,
        edit_threshold: 0,
        attribute_filter: AttributeFilter::any(),
        boost: 1.0,
    });
    plan.set_root(term);
    plan.facets.push(FacetRequest::Categorical { attribute: "genre".into() });
    plan.filter = Some(FilterQuery::parse("year:[1960 TO 1970]")?);
    let results = indexer.search(&plan)?;
    println!("jazz in the sixties -> {:?}", results.external_ids());
    for facet in &results.facets {
        println!("facet '{}': {:?}", facet.attribute, facet.buckets);
    }

    // Completions for a half-typed word.
    println!("suggest 'pin' -> {:?}", indexer.suggest("pin", 0.5, 3)?);

    // Clicks feed back into ranking for the same query.
    indexer.add_feedback("pink flo", "wall")?;
    indexer.commit()?;
    let plan = LogicalPlan::from_keywords(&["pink", "flo"], 10, 2);
    let results = indexer.search(&plan)?;
    println!("'pink flo' after feedback -> {:?}", results.external_ids());

    Ok(())
}
