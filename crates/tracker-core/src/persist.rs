use model::{DataCategory, DataTable};
use tracing::{info, warn};

use crate::sampler::SamplerOutput;
use crate::{data_name, RowFormat, RowSink, TrialContext};

/// Persistence loop body, run on its own thread after the sampling thread
/// has joined. The buffer is quiescent for the entire drain.
pub(crate) fn persist_rows(
    output: SamplerOutput,
    format: &dyn RowFormat,
    context: &dyn TrialContext,
    sink: &dyn RowSink,
) {
    let mut table = DataTable::new(format.header());
    for row in output.rows {
        if let Err(err) = table.add_complete_row(row) {
            warn!(%err, "dropping row that does not match the session header");
        }
    }

    let labels = context.current_labels();
    let name = data_name(&labels, format.descriptor());
    let row_count = table.row_count();
    match sink.save(table, &name, DataCategory::Trackers) {
        Ok(()) => info!(name, rows = row_count, "tracker table persisted"),
        Err(err) => warn!(name, %err, "failed to persist tracker table"),
    }
}
