use tokio::sync::mpsc;

use crate::error::{ErrorKind, SnapshotResult};
use crate::processor::RowProcessor;
use crate::snapshot_error;
use crate::types::Row;

/// Processor forwarding rows to a bounded channel.
///
/// Workers wait while the channel is full, so at most `capacity` rows are in flight between the
/// snapshot and the consumer.
#[derive(Debug, Clone)]
pub struct ChannelRowProcessor {
    tx: mpsc::Sender<Row>,
}

impl ChannelRowProcessor {
    /// Creates a processor together with the receiver consuming its rows.
    ///
    /// A `capacity` of zero is treated as one.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Row>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl RowProcessor for ChannelRowProcessor {
    fn name() -> &'static str {
        "channel"
    }

    async fn process_row(&self, row: Row) -> SnapshotResult<()> {
        let table_name = row.table_name.to_string();
        self.tx.send(row).await.map_err(|_| {
            snapshot_error!(
                ErrorKind::ProcessorError,
                "Row receiver was closed before the snapshot completed",
                table_name
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::types::TableName;

    fn row() -> Row {
        Row::new(Arc::new(TableName::new("public", "users")), Vec::new())
    }

    #[tokio::test]
    async fn full_channel_blocks_the_sender() {
        let (processor, mut rx) = ChannelRowProcessor::new(1);

        processor.process_row(row()).await.unwrap();

        let blocked =
            tokio::time::timeout(Duration::from_millis(50), processor.process_row(row())).await;
        assert!(blocked.is_err());

        assert!(rx.recv().await.is_some());
        processor.process_row(row()).await.unwrap();
    }

    #[tokio::test]
    async fn closed_receiver_rejects_rows() {
        let (processor, rx) = ChannelRowProcessor::new(4);
        drop(rx);

        let err = processor.process_row(row()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProcessorError);
    }

    #[test]
    fn processor_names_are_logged_as_is() {
        assert_eq!(ChannelRowProcessor::name(), "channel");
    }
}
