//! Fakes and record builders shared by unit tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::{CampaignRecord, Domain, Record, UpdateRecord};
use crate::services::{DeliveryError, Fetcher, NotificationChannel};

pub(crate) fn update(lender_id: u64, date: &str, status: &str) -> Record {
    Record::Update(UpdateRecord {
        lender_id,
        company_name: format!("Lender {lender_id}"),
        year: 2024,
        status: Some(status.to_string()),
        substatus: None,
        date: date.to_string(),
        description: format!("Update of {date}"),
        recovered_amount: None,
        remaining_amount: None,
        scraped_at: None,
        extra: BTreeMap::new(),
    })
}

pub(crate) fn campaign(id: u64, name: &str) -> Record {
    Record::Campaign(CampaignRecord {
        id,
        campaign_type: Some(1),
        name: name.to_string(),
        short_description: None,
        valid_from: None,
        valid_to: None,
        bonus_amount: None,
        required_principal_exposure: None,
        terms_conditions_link: None,
        scraped_at: None,
        extra: BTreeMap::new(),
    })
}

/// Fetcher that replays queued responses per domain.
#[derive(Default)]
pub(crate) struct ScriptedFetcher {
    responses: Mutex<HashMap<Domain, VecDeque<std::result::Result<Vec<Record>, String>>>>,
    calls: Mutex<HashMap<Domain, usize>>,
}

impl ScriptedFetcher {
    pub(crate) fn push(&self, domain: Domain, records: Vec<Record>) {
        self.enqueue(domain, Ok(records));
    }

    pub(crate) fn fail(&self, domain: Domain, message: &str) {
        self.enqueue(domain, Err(message.to_string()));
    }

    fn enqueue(&self, domain: Domain, response: std::result::Result<Vec<Record>, String>) {
        self.responses
            .lock()
            .unwrap()
            .entry(domain)
            .or_default()
            .push_back(response);
    }

    pub(crate) fn calls(&self, domain: Domain) -> usize {
        self.calls.lock().unwrap().get(&domain).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, domain: Domain) -> Result<Vec<Record>> {
        *self.calls.lock().unwrap().entry(domain).or_default() += 1;
        let next = self
            .responses
            .lock()
            .unwrap()
            .get_mut(&domain)
            .and_then(VecDeque::pop_front);
        match next {
            Some(Ok(records)) => Ok(records),
            Some(Err(message)) => Err(AppError::fetch(domain, message)),
            None => Err(AppError::fetch(domain, "no scripted response")),
        }
    }
}

/// Channel that records deliveries and replays scripted failures.
#[derive(Default)]
pub(crate) struct RecordingChannel {
    scripted: Mutex<HashMap<String, VecDeque<std::result::Result<(), DeliveryError>>>>,
    always: Mutex<HashMap<String, DeliveryError>>,
    calls: Mutex<HashMap<String, usize>>,
    delivered: Mutex<Vec<(String, String)>>,
}

impl RecordingChannel {
    pub(crate) fn script(&self, recipient: &str, result: std::result::Result<(), DeliveryError>) {
        self.scripted
            .lock()
            .unwrap()
            .entry(recipient.to_string())
            .or_default()
            .push_back(result);
    }

    pub(crate) fn fail_always(&self, recipient: &str, error: DeliveryError) {
        self.always
            .lock()
            .unwrap()
            .insert(recipient.to_string(), error);
    }

    pub(crate) fn calls(&self, recipient: &str) -> usize {
        self.calls.lock().unwrap().get(recipient).copied().unwrap_or(0)
    }

    pub(crate) fn delivered(&self) -> Vec<(String, String)> {
        self.delivered.lock().unwrap().clone()
    }

    pub(crate) fn delivered_to(&self, recipient: &str) -> Vec<String> {
        self.delivered()
            .into_iter()
            .filter(|(r, _)| r == recipient)
            .map(|(_, text)| text)
            .collect()
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    async fn send_message(
        &self,
        recipient: &str,
        text: &str,
    ) -> std::result::Result<(), DeliveryError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(recipient.to_string())
            .or_default() += 1;

        if let Some(error) = self.always.lock().unwrap().get(recipient) {
            return Err(error.clone());
        }
        let scripted = self
            .scripted
            .lock()
            .unwrap()
            .get_mut(recipient)
            .and_then(VecDeque::pop_front);
        if let Some(Err(error)) = scripted {
            return Err(error);
        }
        self.delivered
            .lock()
            .unwrap()
            .push((recipient.to_string(), text.to_string()));
        Ok(())
    }
}
