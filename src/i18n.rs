/*
Message catalog for user-facing text.

Every string the service sends to a person (notification bodies, confirmation
messages, rejection reasons) is looked up here by key, so wording lives in one
place.

Usage:
    use crate::i18n;
    let msg = i18n::t("not_found.donation");
    let body = i18n::tr("notify.donation_posted", &[("title", "Bread, 10 loaves")]);

Notes:
- Placeholders use single-brace format: `{name}`.
- A missing key renders as the key itself so a typo is visible rather than fatal.
*/

use std::collections::HashMap;
use std::sync::OnceLock;

static MESSAGES: OnceLock<HashMap<String, String>> = OnceLock::new();

const EN_JSON: &str = r#"
{
  "notify.donation_posted": "New donation posted: {title}",
  "notify.donation_reserved": "Your donation \"{title}\" has been reserved by {name}",

  "donation.deleted": "Donation deleted successfully",
  "donation.reserved": "Donation \"{title}\" reserved successfully. Please contact the donor to arrange pickup.",
  "donation.unreserved": "Reservation cancelled",
  "donation.unreserved_expired": "Reservation cancelled; the donation has expired",
  "donation.completed": "Donation marked as completed",

  "notifications.marked_read": "All notifications marked as read",
  "notifications.deleted": "Notification deleted",
  "notifications.cleared": "All notifications cleared",

  "not_found.donation": "Donation not found",
  "not_found.notification": "Notification not found",

  "forbidden.donor_only": "Only donors can perform this action",
  "forbidden.recipient_only": "Only recipient organizations can perform this action",
  "forbidden.not_owner": "You can only modify your own donations",
  "forbidden.not_holder": "You can only cancel your own reservations",

  "conflict.not_available": "Donation is not available for reservation",
  "conflict.already_reserved_by_you": "Donation is already reserved by you",
  "conflict.expired": "Donation has expired",
  "conflict.not_reserved": "Donation is not reserved",
  "conflict.must_be_reserved": "Donation must be reserved first",

  "validation.required": "{field} is required",
  "validation.too_long": "{field} cannot exceed {max} characters",
  "validation.pickup_window": "pickupTimeEnd must be after pickupTimeStart",
  "validation.empty_update": "Update contains no editable fields",
  "validation.invalid_status": "Invalid status filter: {value}",
  "validation.invalid_sort": "Invalid sort order: {value}",
  "validation.invalid_index": "Invalid notification index: {value}"
}
"#;

fn messages() -> &'static HashMap<String, String> {
    MESSAGES.get_or_init(|| serde_json::from_str(EN_JSON).unwrap_or_default())
}

/// Look up a message by key without placeholder substitution.
pub fn t(key: &str) -> String {
    tr(key, &[])
}

/// Look up a message by key and substitute `{name}` placeholders.
pub fn tr(key: &str, params: &[(&str, &str)]) -> String {
    let template = messages()
        .get(key)
        .cloned()
        .unwrap_or_else(|| key.to_string());

    substitute(&template, params)
}

/// Single pass over the template; inserted values are never scanned again.
fn substitute(template: &str, params: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let value = after.find('}').and_then(|close| {
            let key = &after[..close];
            params
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (*value, close))
        });

        match value {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}
