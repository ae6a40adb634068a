//! Paged listing endpoints: reports and list-combos.

use rand::Rng;
use serde_json::json;

use super::{Payload, PayloadGenerator, PayloadVariant};
use crate::data_pool::{self, DataPool};
use crate::error::Result;
use crate::scheduler::TaskKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListVariant {
    Default,
    Page2,
    CaseOwnerEmail,
    SfdcCaseNumber,
    CaseOwnerEmailAndSfdcCaseNumber,
}

impl PayloadVariant for ListVariant {
    const ALL: &'static [Self] = &[
        ListVariant::Default,
        ListVariant::Page2,
        ListVariant::CaseOwnerEmail,
        ListVariant::SfdcCaseNumber,
        ListVariant::CaseOwnerEmailAndSfdcCaseNumber,
    ];

    fn name(&self) -> &'static str {
        match self {
            ListVariant::Default => "default",
            ListVariant::Page2 => "page_2",
            ListVariant::CaseOwnerEmail => "case_owner_email",
            ListVariant::SfdcCaseNumber => "sfdc_case_number",
            ListVariant::CaseOwnerEmailAndSfdcCaseNumber => "case_owner_email_and_sfdc_case_number",
        }
    }
}

/// Shared by both listing endpoints; they accept the same filters.
#[derive(Debug, Clone)]
pub struct ListGenerator {
    task: TaskKind,
    page_size: u32,
}

impl ListGenerator {
    pub fn reports(page_size: u32) -> Self {
        Self {
            task: TaskKind::Reports,
            page_size,
        }
    }

    pub fn list_combos(page_size: u32) -> Self {
        Self {
            task: TaskKind::ListCombos,
            page_size,
        }
    }
}

impl PayloadGenerator for ListGenerator {
    type Variant = ListVariant;

    fn task(&self) -> TaskKind {
        self.task
    }

    fn payload_for<R>(&self, variant: ListVariant, pool: &DataPool, rng: &mut R) -> Result<Payload>
    where
        R: Rng + ?Sized,
    {
        let mut payload = json!({
            "page_size": self.page_size,
            "page_no": 1,
        });

        match variant {
            ListVariant::Default => {}
            ListVariant::Page2 => {
                payload["page_no"] = json!(2);
            }
            ListVariant::CaseOwnerEmail => {
                payload["case_owner_email"] = json!(owner_email(pool, rng)?);
            }
            ListVariant::SfdcCaseNumber => {
                payload["sfdc_case_number"] = json!(case_number(pool, rng)?);
            }
            ListVariant::CaseOwnerEmailAndSfdcCaseNumber => {
                payload["case_owner_email"] = json!(owner_email(pool, rng)?);
                payload["sfdc_case_number"] = json!(case_number(pool, rng)?);
            }
        }

        Ok(payload)
    }
}

fn owner_email<'a, R: Rng + ?Sized>(pool: &'a DataPool, rng: &mut R) -> Result<&'a String> {
    data_pool::choose(&pool.case_owner_emails, "case owner emails", rng)
}

fn case_number<'a, R: Rng + ?Sized>(pool: &'a DataPool, rng: &mut R) -> Result<&'a String> {
    data_pool::choose(&pool.sfdc_case_numbers, "SFDC case numbers", rng)
}
