pub mod tcr_repertoire;
