use std::collections::HashMap;

use crate::work_unit::FetchError;
use crate::work_unit::FetchItem;
use crate::work_unit::Message;
use crate::work_unit::WorkUnit;

/// Fold a fetch's decoded items into the messages and errors relevant to one work unit.
///
/// Items are filtered to `unit`'s `(topic, partition)` and offset window
/// `[unit.offset, unit.offset + unit.len)`; everything else is discarded silently, since Kafka
/// may return adjacent records due to protocol framing. Errors never abort the fold: they are
/// collected alongside whatever messages were already accepted.
///
/// Messages sharing a `(topic, partition)` pair overwrite earlier arrivals within the same fetch:
/// this is a deliberate, preserved quirk (see the design notes) rather than a defect, so do not
/// "fix" it into an append-all accumulator. Since every message that survives the filter above
/// already shares `unit`'s own `(topic, partition)`, this means a single `fold` call never
/// returns more than one message: the dedup key only has one possible value per work unit. A
/// fetch response that legitimately carries several distinct records for `unit`'s window still
/// settles with just the single latest one delivered downstream.
pub fn fold(unit: &WorkUnit, items: impl IntoIterator<Item = FetchItem>) -> (Vec<Message>, Vec<FetchError>) {
    let mut messages: HashMap<(String, i32), Message> = HashMap::new();
    let mut errors = Vec::new();

    for item in items {
        match item {
            FetchItem::Message(message) => {
                if message.topic == unit.topic
                    && message.partition == unit.partition
                    && message.offset >= unit.offset
                    && message.offset < unit.offset_ceiling()
                {
                    messages.insert((message.topic.clone(), message.partition), message);
                }
            }
            FetchItem::Error(error) => errors.push(error),
        }
    }

    (messages.into_values().collect(), errors)
}

#[cfg(test)]
mod tests {
    use super::fold;
    use crate::work_unit::BrokerEndpoint;
    use crate::work_unit::FetchError;
    use crate::work_unit::FetchItem;
    use crate::work_unit::Message;
    use crate::work_unit::WorkUnit;

    fn unit() -> WorkUnit {
        WorkUnit {
            producer: BrokerEndpoint::new("b1", 9092),
            topic: "t".into(),
            partition: 0,
            offset: 0,
            len: 10,
        }
    }

    fn message(topic: &str, partition: i32, offset: i64) -> Message {
        Message {
            topic: topic.into(),
            partition,
            offset,
            bytes: format!("msg-{}", offset).into_bytes(),
        }
    }

    #[test]
    fn s1_happy_path_keeps_latest_in_window_message() {
        // Three records on the same (topic, partition): the dedup-by-{topic,partition} rule
        // (see duplicate_partition_entries_collapse_to_latest below) collapses these to the one
        // entry with the highest offset, not three separate messages.
        let unit = unit();
        let items = vec![
            FetchItem::Message(message("t", 0, 0)),
            FetchItem::Message(message("t", 0, 1)),
            FetchItem::Message(message("t", 0, 2)),
        ];
        let (messages, errors) = fold(&unit, items);
        assert_eq!(messages.len(), 1);
        assert!(errors.is_empty());
        assert_eq!(messages[0].offset, 2);
    }

    #[test]
    fn s2_filters_messages_outside_offset_window() {
        // All four records share (topic, partition), so the dedup rule collapses the two that
        // pass the window filter (8, 9) down to the latest of the two: offset 9.
        let unit = unit();
        let items = vec![
            FetchItem::Message(message("t", 0, 8)),
            FetchItem::Message(message("t", 0, 9)),
            FetchItem::Message(message("t", 0, 10)),
            FetchItem::Message(message("t", 0, 11)),
        ];
        let (messages, _) = fold(&unit, items);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].offset, 9);
    }

    #[test]
    fn discards_messages_for_other_topics_and_partitions() {
        let unit = unit();
        let items = vec![
            FetchItem::Message(message("other", 0, 5)),
            FetchItem::Message(message("t", 1, 5)),
            FetchItem::Message(message("t", 0, 5)),
        ];
        let (messages, _) = fold(&unit, items);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].offset, 5);
    }

    #[test]
    fn fetch_errors_are_collected_without_aborting() {
        let unit = unit();
        let items = vec![
            FetchItem::Message(message("t", 0, 1)),
            FetchItem::Error(FetchError::new(1, "leader not available")),
        ];
        let (messages, errors) = fold(&unit, items);
        assert_eq!(messages.len(), 1);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, 1);
    }

    #[test]
    fn duplicate_partition_entries_collapse_to_latest() {
        let unit = unit();
        let items = vec![
            FetchItem::Message(message("t", 0, 1)),
            FetchItem::Message(message("t", 0, 2)),
        ];
        let (messages, _) = fold(&unit, items);
        // Deliberate preserved quirk: same (topic, partition) overwrites, it does not append.
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].offset, 2);
    }

    #[test]
    fn empty_item_sequence_yields_no_progress() {
        let unit = unit();
        let (messages, errors) = fold(&unit, Vec::new());
        assert!(messages.is_empty());
        assert!(errors.is_empty());
    }
}
