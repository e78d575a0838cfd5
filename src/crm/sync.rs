//! CRM pull and write-back operations.
//!
//! CiviCRM stores student data as "child info" custom fields on family
//! contacts, so most queries chain a `CustomValue.get` onto a `Contact.get`
//! and unpack a family -> child -> field nest.

use chrono::NaiveDate;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

use crate::config::Config;
use crate::crm::client::{lenient_i64, lenient_string, CrmClient, CrmError, CrmResult};
use crate::db::{CrmField, Database, DatabaseError, Parent, Student};

/// family id -> child id -> field label -> value
pub type ChildFields = HashMap<String, HashMap<String, HashMap<String, String>>>;

fn word_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\w").unwrap_or_else(|_| unreachable!()))
}

fn digits() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d").unwrap_or_else(|_| unreachable!()))
}

/// Lowercased word characters only, for email slugs.
fn slug(text: &str) -> String {
    word_chars()
        .find_iter(&text.to_lowercase())
        .map(|m| m.as_str())
        .collect()
}

/// Digits only, for phone numbers.
fn phone_digits(text: &str) -> String {
    digits().find_iter(text).map(|m| m.as_str()).collect()
}

/// Candidate school email: a growing first-name prefix, the last name
/// (capped at 20 characters), and the last two digits of the grad year.
/// The domain already carries its `@` as stored by `Config::from_env`.
fn email_candidate(
    common_name: &str,
    last_name: &str,
    graduation_year: i32,
    first_len: usize,
    domain: &str,
) -> String {
    let first = slug(common_name);
    let last = slug(last_name);
    let first: String = first.chars().take(first_len).collect();
    let last: String = last.chars().take(20).collect();
    format!("{first}{last}{:02}{domain}", graduation_year.rem_euclid(100))
}

/// Birthdays arrive in whatever format the CRM operator typed.
fn parse_birthday(raw: &str) -> Option<NaiveDate> {
    if raw.is_empty() {
        return None;
    }
    let head = raw.char_indices().nth(10).map_or(raw, |(i, _)| &raw[..i]);
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(head, "%Y-%m-%d"))
        .or_else(|_| NaiveDate::parse_from_str(raw, "%m/%d/%Y"))
        .ok()
}

pub struct CrmSync {
    client: CrmClient,
    db: Arc<Database>,
    config: Arc<Config>,
}

impl CrmSync {
    pub fn new(client: CrmClient, db: Arc<Database>, config: Arc<Config>) -> Self {
        Self { client, db, config }
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    /// Refresh the custom-field map from the CRM. The map is wiped and
    /// refilled so renamed fields cannot leave stale labels behind.
    pub async fn pull_custom_fields(&self) -> CrmResult<()> {
        let payload = json!({
            "api.CustomField.get": {},
            "is_active": 1,
            "sequential": 1,
        });
        let response = self.client.api_get("CustomGroup", &payload).await?;
        let count = response.get("count").and_then(Value::as_i64).unwrap_or(0);
        if count == 0 {
            return Err(CrmError::Shape("CustomGroup.get returned no groups".into()));
        }

        let groups = response
            .get("values")
            .and_then(Value::as_array)
            .ok_or_else(|| CrmError::Shape("CustomGroup.get values is not an array".into()))?;

        let mut fields = Vec::new();
        for group in groups {
            let Some(records) = group
                .pointer("/api.CustomField.get/values")
                .and_then(Value::as_array)
            else {
                continue;
            };
            for record in records {
                let Some(id) = record.get("id").map(lenient_i64).flatten() else {
                    continue;
                };
                fields.push(CrmField {
                    id,
                    name: record.get("name").map(lenient_string).unwrap_or_default(),
                    label: record.get("label").map(lenient_string).unwrap_or_default(),
                    column_name: record
                        .get("column_name")
                        .map(lenient_string)
                        .unwrap_or_default(),
                });
            }
        }
        let stored = fields.len();
        self.db.replace_crm_fields(&fields).await?;
        info!("Pulled {stored} CRM custom fields");
        Ok(())
    }

    /// The `custom_<id>` API name for a field label shown in the CRM UI.
    async fn api_field(&self, label: &str) -> CrmResult<String> {
        Ok(self.db.crm_field_by_label(label).await?.api_name())
    }

    /// Query child-info fields for every family matching the search terms.
    /// A match on any child returns the whole family.
    pub async fn get_child_fields(
        &self,
        field_labels: &[&str],
        search: &[(&str, Value)],
    ) -> CrmResult<ChildFields> {
        let mut payload = Map::new();
        payload.insert("options".into(), json!({"limit": 0}));
        for (label, value) in search {
            payload.insert(self.api_field(label).await?, value.clone());
        }
        let mut returns = Vec::new();
        for label in field_labels {
            returns.push(Value::String(self.api_field(label).await?));
        }
        payload.insert(
            "api.CustomValue.get".into(),
            json!({"sequential": 0, "return": returns}),
        );

        let response = self.client.api_get("Contact", &Value::Object(payload)).await?;
        let families = response
            .get("values")
            .and_then(Value::as_object)
            .ok_or_else(|| CrmError::Shape("Contact.get values is not an object".into()))?;

        let mut result: ChildFields = HashMap::new();
        for (family_id, family) in families {
            let entry = result.entry(family_id.clone()).or_default();
            let Some(values) = family
                .pointer("/api.CustomValue.get/values")
                .and_then(Value::as_object)
            else {
                continue;
            };
            for (field_id, field_data) in values {
                let Some(field_id) = field_id.parse::<i64>().ok() else {
                    continue;
                };
                let Some(field) = self.db.crm_field_by_id(field_id).await? else {
                    continue;
                };
                let Some(children) = field_data.as_object() else {
                    continue;
                };
                for (child_id, value) in children {
                    // the per-field record carries bookkeeping keys too
                    if matches!(child_id.as_str(), "entity_id" | "entity_table" | "latest" | "id")
                    {
                        continue;
                    }
                    entry
                        .entry(child_id.clone())
                        .or_default()
                        .insert(field.label.clone(), lenient_string(value));
                }
            }
        }
        Ok(result)
    }

    /// Contacts whose custom field matches a value, keyed by contact id.
    pub async fn get_contacts_by_label(
        &self,
        field_label: &str,
        search_value: &str,
    ) -> CrmResult<Map<String, Value>> {
        let field = self.api_field(field_label).await?;
        let mut payload = Map::new();
        payload.insert(field, json!(search_value));
        payload.insert("options".into(), json!({"limit": 0}));
        let response = self.client.api_get("Contact", &Value::Object(payload)).await?;
        response
            .get("values")
            .and_then(Value::as_object)
            .cloned()
            .ok_or_else(|| CrmError::Shape("Contact.get values is not an object".into()))
    }

    /// Values of one field across contacts matching another field.
    pub async fn get_field_by_field(
        &self,
        search_label: &str,
        search_value: &str,
        return_label: &str,
    ) -> CrmResult<Vec<String>> {
        let return_field = self.api_field(return_label).await?;
        let search_field = self.api_field(search_label).await?;
        let mut payload = Map::new();
        payload.insert("return".into(), json!(return_field));
        payload.insert(search_field, json!(search_value));
        payload.insert("options".into(), json!({"limit": 0}));
        let response = self.client.api_get("Contact", &Value::Object(payload)).await?;
        let values = response
            .get("values")
            .and_then(Value::as_object)
            .ok_or_else(|| CrmError::Shape("Contact.get values is not an object".into()))?;
        Ok(values
            .values()
            .map(|contact| {
                contact
                    .get(&return_field)
                    .map(lenient_string)
                    .unwrap_or_default()
            })
            .collect())
    }

    /// Write one child's custom field on a family contact.
    pub async fn set_custom_field(
        &self,
        family_id: &str,
        field_label: &str,
        child_id: &str,
        value: &str,
    ) -> CrmResult<()> {
        let field = self.api_field(field_label).await?;
        let mut payload = Map::new();
        payload.insert("entity_id".into(), json!(family_id));
        payload.insert(format!("{field}:{child_id}"), json!(value));
        self.client
            .api_create("CustomValue", &Value::Object(payload))
            .await?;
        Ok(())
    }

    /// Pull all current students from the CRM: deactivate the cache, then
    /// upsert each child with School Status "Current Student" and give new
    /// ones a school email address.
    pub async fn pull_students(&self) -> CrmResult<usize> {
        self.db.deactivate_students().await?;

        let fields = [
            "School Status",
            "Grad Year",
            "First Name",
            "Middle Name",
            "Common Name",
            "Last Name",
            "Student ID",
            "Birthday",
            "House",
            "Sex",
        ];
        let search = [("School Status", json!("Current Student"))];
        let families = self.get_child_fields(&fields, &search).await?;

        let mut pulled = 0;
        for family in families.values() {
            for child in family.values() {
                let blank = String::new();
                let status = child.get("School Status").unwrap_or(&blank);
                if !status.contains("Current Student") {
                    continue;
                }
                let Some(sis_id) = child.get("Student ID").filter(|id| !id.is_empty()) else {
                    warn!(
                        "{} {} has no student ID in CRM, skipping",
                        child.get("Common Name").unwrap_or(&blank),
                        child.get("Last Name").unwrap_or(&blank)
                    );
                    continue;
                };

                let raw_birthday = child.get("Birthday").cloned().unwrap_or_default();
                let birthday = parse_birthday(&raw_birthday);
                if birthday.is_none() && !raw_birthday.is_empty() {
                    warn!("Student {sis_id} has invalid birthday: {raw_birthday}");
                }

                let student = Student {
                    sis_id: sis_id.clone(),
                    canvas_id: None,
                    common_name: child.get("Common Name").cloned().unwrap_or_default(),
                    first_name: child.get("First Name").cloned().filter(|s| !s.is_empty()),
                    middle_name: child.get("Middle Name").cloned().filter(|s| !s.is_empty()),
                    last_name: child.get("Last Name").cloned().unwrap_or_default(),
                    birthday,
                    gender: child.get("Sex").cloned().filter(|s| !s.is_empty()),
                    graduation_year: child
                        .get("Grad Year")
                        .and_then(|y| y.parse::<i32>().ok()),
                    house: child.get("House").cloned().filter(|s| !s.is_empty()),
                    active: true,
                    password: None,
                    email: None,
                    last_login: None,
                };
                self.db.upsert_student(&student).await?;
                if let Err(e) = self.generate_email(&student.sis_id).await {
                    warn!("Could not generate email for {sis_id}: {e}");
                }
                pulled += 1;
            }
        }
        info!("Pulled {pulled} students from CRM");
        Ok(pulled)
    }

    /// Generate and store a school email for a student who has none,
    /// growing the first-name prefix on collisions.
    pub async fn generate_email(&self, sis_id: &str) -> CrmResult<Option<String>> {
        let student = self
            .db
            .get_student(sis_id)
            .await?
            .ok_or_else(|| CrmError::InvalidData(format!("unknown student {sis_id}")))?;
        if student.email.is_some() {
            return Ok(student.email);
        }
        let Some(grad_year) = student.graduation_year else {
            warn!("Student {sis_id} has no grad year, cannot generate email");
            return Ok(None);
        };

        for first_len in 1..=3 {
            let email = email_candidate(
                &student.common_name,
                &student.last_name,
                grad_year,
                first_len,
                &self.config.student_email_domain,
            );
            match self.db.set_student_email(sis_id, &email).await {
                Ok(()) => return Ok(Some(email)),
                Err(DatabaseError::UniqueViolation(taken)) => {
                    warn!("Email collision with {taken}");
                }
                Err(e) => return Err(e.into()),
            }
        }
        warn!("Could not find a unique email for student {sis_id}");
        Ok(None)
    }

    /// Replace a student's parent links with the CRM contacts whose
    /// "Student ID" field matches. Zero matches means the CRM has no
    /// family; more than three means the search glitched, so leave the
    /// cache alone.
    pub async fn update_parents(&self, student: &Student, active: bool) -> CrmResult<()> {
        let contacts = self
            .get_contacts_by_label("Student ID", &student.sis_id)
            .await?;
        if contacts.is_empty() || contacts.len() > 3 {
            if contacts.len() > 3 {
                warn!(
                    "Student {} matched {} CRM contacts, skipping parent update",
                    student.sis_id,
                    contacts.len()
                );
            }
            return Ok(());
        }

        self.db.clear_student_parents(&student.sis_id).await?;
        for contact in contacts.values() {
            let crm_id = contact
                .get("contact_id")
                .map(lenient_string)
                .unwrap_or_default();
            if crm_id.is_empty() {
                continue;
            }
            let phone = contact
                .get("phone")
                .map(lenient_string)
                .map(|p| phone_digits(&p))
                .filter(|p| !p.is_empty());
            let parent = Parent {
                crm_id: crm_id.clone(),
                canvas_id: None,
                first_name: contact.get("first_name").map(lenient_string).unwrap_or_default(),
                last_name: contact.get("last_name").map(lenient_string).unwrap_or_default(),
                email: contact
                    .get("email")
                    .map(lenient_string)
                    .filter(|e| !e.is_empty()),
                phone,
                password: None,
                active,
            };
            self.db.upsert_parent(&parent).await?;
            self.db.link_student_parent(&student.sis_id, &crm_id).await?;
        }
        Ok(())
    }

    /// Refresh parents for every active student, then fix the active
    /// flags from School Status.
    pub async fn pull_parents(&self) -> CrmResult<()> {
        self.db.deactivate_parents().await?;
        let students = self.db.active_students("").await?;
        for student in &students {
            if let Err(e) = self.update_parents(student, true).await {
                warn!("Parent update failed for {}: {e}", student.sis_id);
            }
        }
        self.set_active_parents().await
    }

    /// Parents of current students are active; everyone else is not.
    pub async fn set_active_parents(&self) -> CrmResult<()> {
        let contacts = self
            .get_contacts_by_label("School Status", "Current Student")
            .await?;
        for parent in self.db.all_parents().await? {
            let active = contacts.contains_key(&parent.crm_id);
            self.db.set_parent_active(&parent.crm_id, active).await?;
        }
        Ok(())
    }

    /// Refresh one student's house from the CRM.
    pub async fn update_house(&self, student: &Student) -> CrmResult<()> {
        let houses = self
            .get_field_by_field("Student ID", &student.sis_id, "House")
            .await?;
        let distinct: std::collections::HashSet<&String> = houses.iter().collect();
        if distinct.len() > 1 {
            warn!(
                "Student {} has multiple houses listed in CRM",
                student.sis_id
            );
        }
        if let Some(house) = houses.first().filter(|h| !h.is_empty()) {
            self.db.set_student_house(&student.sis_id, house).await?;
        }
        Ok(())
    }

    /// Refresh one student's graduation year from the CRM.
    pub async fn update_graduation_year(&self, student: &Student) -> CrmResult<()> {
        let years = self
            .get_field_by_field("Student ID", &student.sis_id, "Grad Year")
            .await?;
        let distinct: std::collections::HashSet<&String> = years.iter().collect();
        if distinct.len() > 1 {
            warn!(
                "Student {} has multiple grad years listed in CRM",
                student.sis_id
            );
        }
        match years.first().and_then(|y| y.parse::<i32>().ok()) {
            Some(year) => {
                self.db
                    .set_student_graduation_year(&student.sis_id, year)
                    .await?
            }
            None => warn!("Student {} has no usable grad year in CRM", student.sis_id),
        }
        Ok(())
    }

    /// Highest assigned student id with the given prefix, from the CRM.
    pub async fn highest_id(&self, starts_with: &str) -> CrmResult<Option<String>> {
        let search = [("Student ID", json!({">=": starts_with}))];
        let families = self.get_child_fields(&["Student ID"], &search).await?;
        let mut ids: Vec<String> = families
            .values()
            .flat_map(|family| family.values())
            .filter_map(|child| child.get("Student ID"))
            .filter(|id| id.starts_with(starts_with))
            .cloned()
            .collect();
        ids.sort();
        Ok(ids.pop())
    }

    /// Assign sequential zero-padded ids to current students missing one,
    /// starting after the highest id known to either the CRM or the cache.
    pub async fn assign_student_ids(&self, starts_with: &str) -> CrmResult<usize> {
        let families = self
            .get_child_fields(
                &["School Status", "Student ID"],
                &[("School Status", json!("Current Student"))],
            )
            .await?;

        let crm_highest = self.highest_id(starts_with).await?;
        let cache_highest = self.db.highest_student_id(starts_with).await?;
        let seed = [crm_highest, cache_highest]
            .into_iter()
            .flatten()
            .max()
            .ok_or_else(|| {
                CrmError::InvalidData(format!("no existing ids start with '{starts_with}'"))
            })?;
        let id_len = seed.len();
        let mut id_num: u64 = seed[starts_with.len()..]
            .parse()
            .map_err(|_| CrmError::InvalidData(format!("id '{seed}' is not numeric")))?;

        let mut assigned = 0;
        for (family_id, family) in &families {
            for (child_id, child) in family {
                let blank = String::new();
                if !child
                    .get("School Status")
                    .unwrap_or(&blank)
                    .contains("Current Student")
                {
                    continue;
                }
                if child.get("Student ID").filter(|id| !id.is_empty()).is_some() {
                    continue;
                }
                id_num += 1;
                let digits = id_len.saturating_sub(starts_with.len());
                let new_id = format!("{starts_with}{id_num:0digits$}");
                match self
                    .set_custom_field(family_id, "Student ID", child_id, &new_id)
                    .await
                {
                    Ok(()) => {
                        info!("Assigned {new_id} to family {family_id} child {child_id}");
                        assigned += 1;
                    }
                    Err(e) => {
                        warn!("Error assigning id {new_id} to family {family_id}: {e}");
                    }
                }
            }
        }
        Ok(assigned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_candidates_grow_first_name() {
        assert_eq!(
            email_candidate("Jane", "O'Brien-Smith", 2030, 1, "@students.example.org"),
            "jobriensmith30@students.example.org"
        );
        assert_eq!(
            email_candidate("Jane", "O'Brien-Smith", 2030, 2, "@students.example.org"),
            "jaobriensmith30@students.example.org"
        );
    }

    #[test]
    fn email_carries_a_single_at_sign() {
        let email = email_candidate("Jane", "Doe", 2030, 1, "@students.example.com");
        assert_eq!(email, "jdoe30@students.example.com");
        assert_eq!(email.matches('@').count(), 1);
    }

    #[test]
    fn phone_keeps_digits_only() {
        assert_eq!(phone_digits("(502) 555-0188"), "5025550188");
        assert_eq!(phone_digits("no phone"), "");
    }

    #[test]
    fn birthday_formats() {
        let expected = NaiveDate::from_ymd_opt(2015, 3, 9).unwrap();
        assert_eq!(parse_birthday("2015-03-09"), Some(expected));
        assert_eq!(parse_birthday("2015-03-09T00:00:00"), Some(expected));
        assert_eq!(parse_birthday("03/09/2015"), Some(expected));
        assert_eq!(parse_birthday("not a date"), None);
        assert_eq!(parse_birthday(""), None);
        // operator free text with multi-byte characters must not panic
        assert_eq!(parse_birthday("9 mars 2015 très tôt"), None);
    }
}
