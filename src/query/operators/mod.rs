pub mod facet;
pub mod feedback_rank;
pub mod geo;
pub mod merge_by_id;
pub mod merge_topk;
pub mod phrase;
pub mod random_access;
pub mod shortest_list;
pub mod sort;
pub mod term_list;
