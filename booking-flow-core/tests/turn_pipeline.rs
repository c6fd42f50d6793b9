//! End-to-end turn pipeline tests
//!
//! 1. Happy path from intake to a sent offer
//! 2. Requirement and date detours from negotiation return to the caller
//! 3. Unparseable dates fail open and keep the detour pending
//! 4. Deferred intents replay over later turns
//! 5. Combo confirmation commits or rolls back as one unit
//! 6. Date choice prompt opened by the planner and answered by number
//! 7. Single intents the planner owns still respect prerequisites
//! 8. Bound exhaustion and unknown steps degrade without errors

mod helpers;

use booking_flow_core::config::PlannerConfig;
use booking_flow_core::dispatch::DispatchTermination;
use booking_flow_core::facts::{ExtractedFacts, ProductAction, ProductChange};
use booking_flow_core::planner::execute::{ApplyError, IntentApplier, RecordApplier};
use booking_flow_core::planner::intents::{DeferralReason, Intent, NeedsInputKind};
use booking_flow_core::planner::ExecutionMode;
use booking_flow_core::record::{DateWindow, RoomStatus, TimeWindow};
use booking_flow_core::{
    ChangeType, EventRecord, FlowConfig, GroupResult, GuardSnapshot, MemoryRecordStore,
    RecordStore, Step, StepRegistry, TurnPipeline,
};
use chrono::{NaiveDate, NaiveTime};
use helpers::booking_registry;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, day).unwrap()
}

fn pipeline() -> TurnPipeline {
    TurnPipeline::new(FlowConfig::default(), booking_registry())
}

fn participants(n: u32) -> ExtractedFacts {
    ExtractedFacts {
        participants: Some(n),
        ..Default::default()
    }
}

fn stated_date(raw: &str) -> ExtractedFacts {
    ExtractedFacts {
        date: Some(raw.to_string()),
        ..Default::default()
    }
}

/// Drive a fresh conversation to the negotiation stage
fn at_negotiation(pipeline: &TurnPipeline, store: &MemoryRecordStore) -> Uuid {
    let id = Uuid::new_v4();
    pipeline.handle_message(store, id, &participants(30)).unwrap();
    pipeline
        .handle_message(store, id, &stated_date("2026-03-14"))
        .unwrap();
    id
}

#[test]
fn intake_to_offer_in_one_turn() {
    let store = MemoryRecordStore::new();
    let pipeline = pipeline();
    let id = Uuid::new_v4();

    let (_, first) = pipeline.handle_message(&store, id, &participants(30)).unwrap();
    assert_eq!(first.reply.action, "ask_intake");

    let (record, second) = pipeline
        .handle_message(&store, id, &stated_date("2026-03-14"))
        .unwrap();

    let dispatch = second.dispatch.unwrap();
    assert_eq!(
        dispatch.visited,
        vec![
            Step::Intake,
            Step::DateConfirmation,
            Step::RoomAvailability,
            Step::Offer
        ]
    );
    assert_eq!(second.reply.action, "offer_sent");
    assert_eq!(record.step(), Some(Step::Negotiation));
    assert_eq!(record.chosen_date, Some(date(14)));
    assert_eq!(record.locked_room_id.as_deref(), Some("main_hall"));
    assert_eq!(record.room_eval_hash, record.requirements_hash);
    assert_eq!(record.offer_hash, record.requirements_hash);
}

#[test]
fn requirements_change_detours_through_room_and_returns() {
    let store = MemoryRecordStore::new();
    let pipeline = pipeline();
    let id = at_negotiation(&pipeline, &store);

    let (record, outcome) = pipeline.handle_message(&store, id, &participants(45)).unwrap();

    assert_eq!(outcome.change, Some(ChangeType::Requirements));
    let decision = outcome.decision.unwrap();
    assert_eq!(decision.next_step, Step::RoomAvailability);
    assert_eq!(decision.updated_caller_step, Some(Step::Negotiation));

    let dispatch = outcome.dispatch.unwrap();
    assert_eq!(dispatch.visited, vec![Step::RoomAvailability, Step::Negotiation]);
    assert_eq!(record.step(), Some(Step::Negotiation));
    assert!(!record.has_pending_caller());
    assert_eq!(record.room_eval_hash, record.requirements_hash);
}

#[test]
fn restated_requirements_change_nothing() {
    let store = MemoryRecordStore::new();
    let pipeline = pipeline();
    let id = at_negotiation(&pipeline, &store);

    let (_, outcome) = pipeline.handle_message(&store, id, &participants(30)).unwrap();

    assert!(outcome.changes.is_empty());
    assert!(outcome.decision.is_none());
    assert_eq!(outcome.reply.action, "negotiate");
}

#[test]
fn date_change_detours_and_returns_to_negotiation() {
    let store = MemoryRecordStore::new();
    let pipeline = pipeline();
    let id = at_negotiation(&pipeline, &store);

    let (record, outcome) = pipeline
        .handle_message(&store, id, &stated_date("21.03.2026"))
        .unwrap();

    assert_eq!(outcome.change, Some(ChangeType::Date));
    assert_eq!(record.chosen_date, Some(date(21)));
    assert_eq!(record.step(), Some(Step::Negotiation));
    assert!(!record.has_pending_caller());
    assert_eq!(outcome.reply.action, "negotiate");
}

#[test]
fn unparseable_date_keeps_detour_pending() {
    let store = MemoryRecordStore::new();
    let pipeline = pipeline();
    let id = at_negotiation(&pipeline, &store);

    let (record, outcome) = pipeline
        .handle_message(&store, id, &stated_date("the week after easter"))
        .unwrap();

    assert_eq!(outcome.change, Some(ChangeType::Date));
    assert_eq!(outcome.reply.action, "ask_date");
    assert_eq!(record.step(), Some(Step::DateConfirmation));
    assert_eq!(record.caller_step(), Some(Step::Negotiation));
    // the stored date is untouched until a readable one arrives
    assert_eq!(record.chosen_date, Some(date(14)));

    let (record, outcome) = pipeline
        .handle_message(&store, id, &stated_date("2026-03-28"))
        .unwrap();

    assert_eq!(outcome.decision.unwrap().next_step, Step::DateConfirmation);
    assert_eq!(record.chosen_date, Some(date(28)));
    assert_eq!(record.step(), Some(Step::Negotiation));
    assert!(!record.has_pending_caller());
}

#[test]
fn deferred_intents_replay_over_later_turns() {
    let store = MemoryRecordStore::new();
    let pipeline = pipeline();
    let id = Uuid::new_v4();
    let facts = ExtractedFacts {
        date: Some("2026-03-14".into()),
        time_window: Some(TimeWindow::new(
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
        )),
        room: Some("alpine".into()),
        participants: Some(20),
        ..Default::default()
    };

    let (record, first) = pipeline.handle_message(&store, id, &facts).unwrap();
    let plan = first.plan.unwrap();
    assert_eq!(plan.executed.len(), 1);
    assert_eq!(plan.deferred_count, 2);
    assert_eq!(record.open_pending().count(), 2);
    assert_eq!(first.reply.action, "ask_intake");

    // the deferred room is not on the record yet
    assert_eq!(record.requirements.preferred_room, None);

    let (record, second) = pipeline
        .handle_message(&store, id, &ExtractedFacts::default())
        .unwrap();
    assert_eq!(second.plan.unwrap().telemetry.replayed, 2);
    assert_eq!(second.change, Some(ChangeType::Requirements));
    assert_eq!(record.requirements.participants, Some(20));
    assert_eq!(record.locked_room_id.as_deref(), Some("main_hall"));
    assert_eq!(record.step(), Some(Step::Negotiation));
    assert_eq!(record.open_pending().count(), 1);

    let (record, third) = pipeline
        .handle_message(&store, id, &ExtractedFacts::default())
        .unwrap();
    assert_eq!(third.change, Some(ChangeType::Room));
    assert_eq!(record.locked_room_id.as_deref(), Some("alpine"));
    assert_eq!(record.requirements.preferred_room.as_deref(), Some("alpine"));
    assert_eq!(record.open_pending().count(), 0);
    assert_eq!(record.pending_intents.len(), 2);
}

fn full_day() -> TimeWindow {
    TimeWindow::new(
        NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
    )
}

fn date_and_room() -> ExtractedFacts {
    ExtractedFacts {
        date: Some("2026-03-14".into()),
        time_window: Some(full_day()),
        room: Some("alpine".into()),
        ..Default::default()
    }
}

struct RejectRooms;

impl IntentApplier for RejectRooms {
    fn apply(&self, record: &mut EventRecord, intent: &Intent) -> Result<(), ApplyError> {
        match intent {
            Intent::SelectRoom { room_id } => Err(ApplyError::RoomUnavailable(room_id.clone())),
            other => RecordApplier.apply(record, other),
        }
    }
}

#[test]
fn combo_confirms_date_and_room_in_one_turn() {
    let store = MemoryRecordStore::new();
    let pipeline = pipeline();
    let mut record = EventRecord::new(Uuid::new_v4());
    record.current_step = Step::RoomAvailability.number();
    record.requirements.participants = Some(20);
    record.flag_room("alpine", RoomStatus::Available);

    let outcome = pipeline
        .process_turn(&mut record, &date_and_room(), &store)
        .unwrap();

    let plan = outcome.plan.unwrap();
    assert_eq!(plan.mode, ExecutionMode::Combo);
    assert!(plan.combined_confirmation);
    assert_eq!(record.chosen_date, Some(date(14)));
    assert_eq!(record.locked_room_id.as_deref(), Some("alpine"));
    assert_eq!(record.requirements.time_window, Some(full_day()));
    assert_eq!(record.open_pending().count(), 0);
    assert_eq!(outcome.reply.action, "offer_sent");
}

#[test]
fn rolled_back_combo_leaves_no_trace() {
    let store = MemoryRecordStore::new();
    let pipeline = pipeline().with_applier(Arc::new(RejectRooms));
    let mut record = EventRecord::new(Uuid::new_v4());
    record.flag_room("alpine", RoomStatus::Available);

    let outcome = pipeline
        .process_turn(&mut record, &date_and_room(), &store)
        .unwrap();

    let plan = outcome.plan.unwrap();
    assert!(!plan.combined_confirmation);
    assert!(plan.executed.is_empty());
    assert!(plan
        .deferred
        .iter()
        .all(|d| d.reason == DeferralReason::ComboRolledBack));
    assert_eq!(record.chosen_date, None);
    assert!(!record.date_confirmed);
    assert!(record.requested_date.is_none());
    assert_eq!(record.locked_room_id, None);
    assert_eq!(record.requirements.preferred_room, None);
    assert_eq!(record.requirements.time_window, None);
    assert_eq!(record.open_pending().count(), 2);
    assert_eq!(outcome.reply.action, "ask_intake");
}

#[test]
fn legacy_limit_applies_three_intents_at_once() {
    let store = MemoryRecordStore::new();
    let config = FlowConfig {
        planner: PlannerConfig::legacy(),
        ..Default::default()
    };
    let pipeline = TurnPipeline::new(config, booking_registry());
    let facts = ExtractedFacts {
        date: Some("2026-03-14".into()),
        room: Some("alpine".into()),
        participants: Some(20),
        ..Default::default()
    };

    let (record, outcome) = pipeline
        .handle_message(&store, Uuid::new_v4(), &facts)
        .unwrap();

    assert_eq!(outcome.plan.unwrap().deferred_count, 0);
    assert_eq!(record.open_pending().count(), 0);
    assert_eq!(outcome.reply.action, "offer_sent");
}

#[test]
fn date_choice_prompt_answered_by_number() {
    let store = MemoryRecordStore::new();
    // the replayed room runs in the same turn as the chosen date
    let config = FlowConfig {
        planner: PlannerConfig::legacy(),
        ..Default::default()
    };
    let pipeline = TurnPipeline::new(config, booking_registry());
    let mut record = EventRecord::new(Uuid::new_v4());
    record.current_step = Step::DateConfirmation.number();

    let window = ExtractedFacts {
        date_window: Some(DateWindow {
            start: date(10),
            end: date(20),
        }),
        ..Default::default()
    };
    let outcome = pipeline.process_turn(&mut record, &window, &store).unwrap();
    assert_eq!(outcome.reply.action, "ask_date");
    assert_eq!(record.date_candidates, vec![date(10), date(11), date(12)]);

    let room_and_size = ExtractedFacts {
        room: Some("alpine".into()),
        participants: Some(12),
        ..Default::default()
    };
    let outcome = pipeline
        .process_turn(&mut record, &room_and_size, &store)
        .unwrap();
    let plan = outcome.plan.unwrap();
    assert_eq!(plan.question.kind, Some(NeedsInputKind::DateChoice));
    assert!(record.choice_context.is_some());

    let pick = ExtractedFacts {
        choice_selection: Some(2),
        ..Default::default()
    };
    let outcome = pipeline.process_turn(&mut record, &pick, &store).unwrap();

    assert_eq!(record.chosen_date, Some(date(11)));
    assert!(record.choice_context.is_none());
    assert_eq!(record.locked_room_id.as_deref(), Some("alpine"));
    assert_eq!(outcome.reply.action, "offer_sent");
}

#[test]
fn choice_answered_with_nothing_queued() {
    let store = MemoryRecordStore::new();
    let pipeline = pipeline();
    let mut record = EventRecord::new(Uuid::new_v4());
    record.current_step = Step::DateConfirmation.number();

    let window = ExtractedFacts {
        date_window: Some(DateWindow {
            start: date(10),
            end: date(20),
        }),
        ..Default::default()
    };
    let outcome = pipeline.process_turn(&mut record, &window, &store).unwrap();
    assert_eq!(outcome.reply.action, "ask_date");

    let vague = ExtractedFacts {
        date: Some("sometime soon".into()),
        participants: Some(20),
        ..Default::default()
    };
    let outcome = pipeline.process_turn(&mut record, &vague, &store).unwrap();
    assert_eq!(
        outcome.plan.unwrap().question.kind,
        Some(NeedsInputKind::DateChoice)
    );
    assert!(record.choice_context.is_some());
    assert_eq!(record.open_pending().count(), 0);

    let pick = ExtractedFacts {
        choice_selection: Some(1),
        ..Default::default()
    };
    let outcome = pipeline.process_turn(&mut record, &pick, &store).unwrap();

    assert!(outcome.plan.is_some());
    assert_eq!(outcome.change, Some(ChangeType::Date));
    assert_eq!(record.chosen_date, Some(date(10)));
    assert!(record.choice_context.is_none());
    assert_eq!(outcome.reply.action, "offer_sent");
}

#[test]
fn product_before_room_is_deferred() {
    let store = MemoryRecordStore::new();
    let pipeline = pipeline();
    let lunch = ExtractedFacts {
        products: vec![ProductChange {
            action: ProductAction::Add,
            name: "lunch".into(),
            quantity: Some(20),
        }],
        ..Default::default()
    };

    let (record, outcome) = pipeline
        .handle_message(&store, Uuid::new_v4(), &lunch)
        .unwrap();

    let plan = outcome.plan.unwrap();
    assert_eq!(plan.deferred[0].reason, DeferralReason::ProductRequiresRoom);
    assert_eq!(plan.question.kind, Some(NeedsInputKind::Availability));
    assert!(record.products.is_empty());
    assert_eq!(record.open_pending().count(), 1);
    assert_eq!(outcome.reply.action, "ask_intake");
}

#[test]
fn choice_prompt_expires_after_ttl() {
    let store = MemoryRecordStore::new();
    let pipeline = pipeline();
    let mut record = EventRecord::new(Uuid::new_v4());
    record.begin_turn();
    record.open_choice(
        booking_flow_core::record::ChoiceKind::DateOption,
        vec!["2026-03-10".into()],
        2,
    );

    let first = pipeline
        .process_turn(&mut record, &ExtractedFacts::default(), &store)
        .unwrap();
    assert!(!first.choice_expired);
    let second = pipeline
        .process_turn(&mut record, &ExtractedFacts::default(), &store)
        .unwrap();
    assert!(second.choice_expired);
    assert!(record.choice_context.is_none());
}

#[test]
fn oscillating_handlers_hit_the_bound() {
    let store = MemoryRecordStore::new();
    let mut registry = StepRegistry::new();
    registry
        .register(Step::Transition, |rec: &mut EventRecord, _: &GuardSnapshot| {
            rec.move_to(Step::Confirmation, "forward");
            GroupResult::proceed("forward", json!({}))
        })
        .register(Step::Confirmation, |rec: &mut EventRecord, _: &GuardSnapshot| {
            rec.move_to(Step::Transition, "back");
            GroupResult::proceed("back", json!({}))
        });
    let pipeline = TurnPipeline::new(FlowConfig::default(), registry);
    let mut record = EventRecord::new(Uuid::new_v4());
    record.current_step = Step::Transition.number();

    let outcome = pipeline
        .process_turn(&mut record, &ExtractedFacts::default(), &store)
        .unwrap();

    let dispatch = outcome.dispatch.unwrap();
    assert_eq!(dispatch.termination, DispatchTermination::BoundExceeded);
    assert_eq!(dispatch.iterations, 6);
    assert_eq!(outcome.reply.action, "back");
    assert_eq!(store.get(record.event_id).unwrap(), record);
}

#[test]
fn unknown_step_degrades_without_error() {
    let store = MemoryRecordStore::new();
    let mut record = EventRecord::new(Uuid::new_v4());
    record.current_step = 0;

    let outcome = pipeline()
        .process_turn(&mut record, &stated_date("2026-03-14"), &store)
        .unwrap();

    assert!(outcome.decision.is_none());
    assert_eq!(
        outcome.dispatch.unwrap().termination,
        DispatchTermination::UnknownStep(0)
    );
    assert_eq!(outcome.reply.action, "acknowledged");
}
