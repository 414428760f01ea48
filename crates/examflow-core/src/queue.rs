//! Payloads delivered by the examination workflow queues.
//!
//! These mirror the JSON the backend pushes on the private item destination
//! and the public broadcast topics. Fields use camelCase on the wire and
//! unknown fields are ignored, so backend additions do not break decoding.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A unit of work assigned to one staff member: an examination ticket or a
/// billing ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    /// Identifier of the queue entry.
    pub queue_item_id: String,

    /// Snapshot of the medical form this item belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medical_form: Option<MedicalForm>,

    /// The service the patient is queued for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_service: Option<RequestedService>,
}

impl QueueItem {
    /// Creates an item carrying only its identifier.
    pub fn new(queue_item_id: impl Into<String>) -> Self {
        Self {
            queue_item_id: queue_item_id.into(),
            medical_form: None,
            requested_service: None,
        }
    }

    /// Builder: attach a medical form snapshot.
    pub fn with_medical_form(mut self, form: MedicalForm) -> Self {
        self.medical_form = Some(form);
        self
    }

    /// Builder: attach the requested service.
    pub fn with_requested_service(mut self, service: RequestedService) -> Self {
        self.requested_service = Some(service);
        self
    }

    /// Invoice id for billing tickets.
    pub fn invoice_id(&self) -> Option<&str> {
        self.medical_form
            .as_ref()
            .and_then(|form| form.invoice.as_ref())
            .map(|invoice| invoice.invoice_id.as_str())
    }

    /// Form-rendering template of the requested service, if any.
    pub fn form_template(&self) -> Option<&str> {
        self.requested_service
            .as_ref()
            .map(|service| service.form_template.as_str())
            .filter(|template| !template.is_empty())
    }

    /// Patient name, from the examination or else the invoice.
    pub fn patient_name(&self) -> Option<&str> {
        let form = self.medical_form.as_ref()?;
        form.examination
            .as_ref()
            .and_then(|exam| exam.patient_name.as_deref())
            .or_else(|| form.invoice.as_ref().map(|inv| inv.patient_name.as_str()))
    }
}

/// Medical form snapshot embedded in a queue item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicalForm {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub examination: Option<Examination>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice: Option<InvoiceDetails>,

    pub medical_form_status: String,
}

/// Examination details for doctor tickets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Examination {
    pub id: String,
    pub patient_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appointment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Invoice snapshot for billing tickets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceDetails {
    pub invoice_id: String,
    pub patient_id: String,
    pub patient_name: String,
    pub patient_email: String,
    pub patient_phone: String,
    /// Package lines, kept opaque; the REST layer owns their schema.
    #[serde(default)]
    pub medical_packages: Vec<Value>,
    pub total_amount: f64,
    pub status: String,
}

/// The service a queue item was created for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestedService {
    pub service_id: String,
    pub name: String,
    pub processing_priority: i32,
    pub department_id: String,
    /// Form-builder schema used to render the result form.
    #[serde(default)]
    pub form_template: String,
}

/// Number of items waiting in a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueSize(pub u64);

impl QueueSize {
    /// Returns the raw count.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for QueueSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Update pushed on a public per-queue topic.
///
/// The backend currently broadcasts the queue size as a bare integer, but the
/// topic is named `list` and consumers also log whole payloads, so the value
/// is kept as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueBroadcast(pub Value);

impl QueueBroadcast {
    /// Returns the queue size when the broadcast is a bare non-negative integer.
    pub fn size(&self) -> Option<QueueSize> {
        self.0.as_u64().map(QueueSize)
    }

    /// Returns the raw JSON value.
    pub fn value(&self) -> &Value {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_examination_item() {
        let body = json!({
            "queueItemId": "q-1",
            "medicalForm": {
                "id": "mf-7",
                "examination": {
                    "id": "ex-3",
                    "patientId": "p-9",
                    "patientName": "Tran Thi B",
                    "status": "IN_PROGRESS"
                },
                "medicalFormStatus": "PROCESSING"
            },
            "requestedService": {
                "serviceId": "svc-1",
                "name": "Blood test",
                "processingPriority": 2,
                "departmentId": "cardiology",
                "formTemplate": "{\"components\":[]}"
            },
            "unexpectedField": true
        });

        let item: QueueItem = serde_json::from_value(body).unwrap();
        assert_eq!(item.queue_item_id, "q-1");
        assert_eq!(item.patient_name(), Some("Tran Thi B"));
        assert_eq!(item.form_template(), Some("{\"components\":[]}"));
        assert_eq!(item.invoice_id(), None);
    }

    #[test]
    fn decode_billing_item() {
        let body = json!({
            "queueItemId": "q-2",
            "medicalForm": {
                "id": "mf-8",
                "invoice": {
                    "invoiceId": "inv-5",
                    "patientId": "p-1",
                    "patientName": "Nguyen Van A",
                    "patientEmail": "a@example.com",
                    "patientPhone": "0900000000",
                    "medicalPackages": [{"id": "pkg-1"}],
                    "totalAmount": 350000.0,
                    "status": "PENDING"
                },
                "medicalFormStatus": "AWAITING_PAYMENT"
            }
        });

        let item: QueueItem = serde_json::from_value(body).unwrap();
        assert_eq!(item.invoice_id(), Some("inv-5"));
        assert_eq!(item.patient_name(), Some("Nguyen Van A"));
        assert!(item.form_template().is_none());
    }

    #[test]
    fn item_without_snapshots_serializes_compactly() {
        let json = serde_json::to_string(&QueueItem::new("q-3")).unwrap();
        insta::assert_snapshot!(json, @r#"{"queueItemId":"q-3"}"#);
    }

    #[test]
    fn queue_size_is_a_bare_integer() {
        let size: QueueSize = serde_json::from_str("4").unwrap();
        assert_eq!(size, QueueSize(4));
        assert!(serde_json::from_str::<QueueSize>("-1").is_err());
        assert!(serde_json::from_str::<QueueSize>("\"4\"").is_err());
    }

    #[test]
    fn broadcast_size_only_for_integers() {
        let numeric: QueueBroadcast = serde_json::from_str("12").unwrap();
        assert_eq!(numeric.size(), Some(QueueSize(12)));

        let list: QueueBroadcast = serde_json::from_str(r#"[{"id":"q-1"}]"#).unwrap();
        assert_eq!(list.size(), None);
        assert!(list.value().is_array());
    }
}
