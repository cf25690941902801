//! Import: input readers, entity resolution and the transactional pipeline

mod cancel;
mod pipeline;
mod properties;
pub mod reader;
mod resolver;
mod table;

pub use cancel::CancellationToken;
pub use pipeline::{
    DuplicatePolicy, ImportError, ImportOptions, ImportOutcome, ImportPipeline, ImportProgress,
    ImportResult, ImportStage, ImportStats, RetryPolicy,
};
pub use properties::{
    attach_properties, read_fasta, read_property_table, read_sequences, AttachReport, TaxonProperties,
    SEQUENCE_PROPERTY,
};
pub use reader::{
    read_file, read_files, reader_for_path, BiomReader, EdgeListReader, InputFormat, InputReader,
    ReadError, SourceMeta,
};
pub use resolver::{EntityHandle, EntityKey, EntityResolver, ResolveError};
pub use table::{read_tab_tables, MetadataTable, TabTablePaths, TabTableReader, TableRow};
