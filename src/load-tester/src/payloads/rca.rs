//! Root-cause-analysis endpoints: events, AI report summary and ask-AI.

use rand::Rng;
use serde_json::{json, Value};

use super::{Payload, PayloadGenerator, PayloadVariant};
use crate::data_pool::{self, BundleId, ComboId, DataPool};
use crate::error::Result;
use crate::scheduler::TaskKind;
use crate::session::UserSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventsVariant {
    Default,
    ComboIdOnly,
    ComboIdWithCurated,
    BundleIdWithCurated,
}

impl PayloadVariant for EventsVariant {
    const ALL: &'static [Self] = &[
        EventsVariant::Default,
        EventsVariant::ComboIdOnly,
        EventsVariant::ComboIdWithCurated,
        EventsVariant::BundleIdWithCurated,
    ];

    fn name(&self) -> &'static str {
        match self {
            EventsVariant::Default => "default",
            EventsVariant::ComboIdOnly => "combo_id_only",
            EventsVariant::ComboIdWithCurated => "combo_id_with_curated",
            EventsVariant::BundleIdWithCurated => "bundle_id_with_curated",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventsGenerator {
    pub bundle_id: BundleId,
    pub combo_id: ComboId,
}

impl EventsGenerator {
    pub fn new<R>(pool: &DataPool, session: &UserSession, rng: &mut R) -> Result<Self>
    where
        R: Rng + ?Sized,
    {
        Ok(Self {
            bundle_id: session.pick_bundle(&pool.bundle_ids, rng)?,
            combo_id: session.pick_combo(&pool.combo_ids, rng)?,
        })
    }
}

impl PayloadGenerator for EventsGenerator {
    type Variant = EventsVariant;

    fn task(&self) -> TaskKind {
        TaskKind::Events
    }

    fn payload_for<R>(&self, variant: EventsVariant, _pool: &DataPool, _rng: &mut R) -> Result<Payload>
    where
        R: Rng + ?Sized,
    {
        let payload = match variant {
            EventsVariant::Default => json!({
                "curated_event": Value::Null,
                "bundle_id": self.bundle_id,
            }),
            EventsVariant::ComboIdOnly => json!({
                "combo_id": self.combo_id,
                "curated_event": Value::Null,
            }),
            EventsVariant::ComboIdWithCurated => json!({
                "combo_id": self.combo_id,
                "curated_event": true,
            }),
            EventsVariant::BundleIdWithCurated => json!({
                "bundle_id": self.bundle_id,
                "curated_event": true,
            }),
        };
        Ok(payload)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiSummaryVariant {
    ComboIdOnly,
    BundleIdOnly,
}

impl PayloadVariant for AiSummaryVariant {
    const ALL: &'static [Self] = &[AiSummaryVariant::ComboIdOnly, AiSummaryVariant::BundleIdOnly];

    fn name(&self) -> &'static str {
        match self {
            AiSummaryVariant::ComboIdOnly => "combo_id_only",
            AiSummaryVariant::BundleIdOnly => "bundle_id_only",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AiSummaryGenerator {
    pub bundle_id: BundleId,
    pub combo_id: ComboId,
}

impl AiSummaryGenerator {
    pub fn new<R>(pool: &DataPool, session: &UserSession, rng: &mut R) -> Result<Self>
    where
        R: Rng + ?Sized,
    {
        Ok(Self {
            bundle_id: session.pick_bundle(&pool.bundle_ids, rng)?,
            combo_id: session.pick_combo(&pool.combo_ids, rng)?,
        })
    }
}

impl PayloadGenerator for AiSummaryGenerator {
    type Variant = AiSummaryVariant;

    fn task(&self) -> TaskKind {
        TaskKind::ReportSummary
    }

    fn payload_for<R>(&self, variant: AiSummaryVariant, _pool: &DataPool, _rng: &mut R) -> Result<Payload>
    where
        R: Rng + ?Sized,
    {
        Ok(match variant {
            AiSummaryVariant::ComboIdOnly => json!({ "combo_id": self.combo_id }),
            AiSummaryVariant::BundleIdOnly => json!({ "bundle_id": self.bundle_id }),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AskAiVariant {
    Default,
}

impl PayloadVariant for AskAiVariant {
    const ALL: &'static [Self] = &[AskAiVariant::Default];

    fn name(&self) -> &'static str {
        "default"
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AskAiGenerator;

impl PayloadGenerator for AskAiGenerator {
    type Variant = AskAiVariant;

    fn task(&self) -> TaskKind {
        TaskKind::AskAi
    }

    fn payload_for<R>(&self, _variant: AskAiVariant, pool: &DataPool, rng: &mut R) -> Result<Payload>
    where
        R: Rng + ?Sized,
    {
        let message = data_pool::choose(&pool.messages, "messages", rng)?;
        Ok(json!({ "messages": [message] }))
    }
}
