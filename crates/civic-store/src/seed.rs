//! Default contents served when a collection has never been written or
//! cannot be read.

use serde_json::json;

use civic_core::record::{CollectionKind, Record};

/// Seed for `kind`, with freshness markers set to `now`.
pub fn default_collection(kind: CollectionKind, now: i64) -> Vec<Record> {
    let values = match kind {
        CollectionKind::Events => vec![
            json!({
                "id": 1,
                "title": "Lecture: anti-corruption legislation",
                "date": "2024-01-25",
                "time": "18:00",
                "location": "Almaty, Al-Farabi Kazakh National University",
                "participants": 45,
                "maxParticipants": 100,
                "points": 25,
                "type": "lecture",
                "status": "upcoming",
                "description": "An introduction to the national anti-corruption legal framework",
                "organizer": "Moderator A. Nurlanova",
                "createdBy": "admin",
            }),
            json!({
                "id": 2,
                "title": "Flash mob \"For honesty in education\"",
                "date": "2024-01-28",
                "time": "15:00",
                "location": "Almaty, Republic Square",
                "participants": 23,
                "maxParticipants": 50,
                "points": 30,
                "type": "flashmob",
                "status": "upcoming",
                "description": "A peaceful action for transparency in the education system",
                "organizer": "Organizer E. Toktarov",
                "createdBy": "organizer",
            }),
        ],
        CollectionKind::Reports => vec![json!({
            "id": 1,
            "title": "Bribe demanded at a public service center",
            "description": "An employee asks for an extra payment to speed up paperwork",
            "category": "bribery",
            "status": "pending",
            "priority": "high",
            "location": "Almaty, Almalinsky district service center",
            "submittedBy": "Volunteer A. Kasymov",
            "submittedAt": "2024-01-20T10:30:00Z",
            "assignedTo": "Awaiting assignment",
            "createdBy": "volunteer",
        })],
        CollectionKind::Notifications => Vec::new(),
    };

    values
        .into_iter()
        .filter_map(Record::from_value)
        .map(|mut record| {
            record.stamp(kind, now);
            record
        })
        .collect()
}

/// Largest integer id in the seed. Generated ids always exceed it.
pub const MAX_SEED_ID: i64 = 2;

#[cfg(test)]
mod tests {
    use super::*;
    use civic_core::record::RecordId;

    #[test]
    fn seed_shape() {
        let events = default_collection(CollectionKind::Events, 10);
        let ids: Vec<_> = events.iter().filter_map(Record::id).collect();
        assert_eq!(ids, vec![RecordId::Int(1), RecordId::Int(2)]);
        assert!(events.iter().all(|e| e.get_i64("lastModified") == Some(10)));

        let reports = default_collection(CollectionKind::Reports, 10);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].get_str("category"), Some("bribery"));

        assert!(default_collection(CollectionKind::Notifications, 10).is_empty());
    }

    #[test]
    fn seed_ids_stay_below_generated_range() {
        for kind in CollectionKind::ALL {
            for record in default_collection(kind, 0) {
                let id = record.id().and_then(|id| id.as_int()).unwrap();
                assert!(id <= MAX_SEED_ID);
            }
        }
    }
}
