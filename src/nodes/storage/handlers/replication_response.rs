use crate::{
    lattice::Lattice,
    messages::{
        replication_factor::ReplicationFactor,
        request::{PutTuple, RequestData},
        response::{ResponseTuple, ResponseType},
        Request, Response,
    },
    metadata::MetadataKey,
    nodes::storage::StorageNode,
    placement::PlacementOracle,
    Key, MeldError,
};
use eyre::{anyhow, bail, Context};
use std::{collections::HashMap, time::Instant};

impl<P: PlacementOracle> StorageNode<P> {
    /// Handles responses to replication-factor requests.
    ///
    /// Applies the fetched factors to the replication cache (or installs the
    /// defaults on `KeyDoesNotExist`), then drains all requests and gossip
    /// that were deferred while the key's replication was unknown.
    pub async fn replication_response_handler(&mut self, response: Response) -> eyre::Result<()> {
        let work_start = Instant::now();

        if response.error.is_err() || response.ty != ResponseType::Get {
            bail!("invalid replication response");
        }

        let tuple = match response.tuples.as_slice() {
            [tuple] => tuple,
            other => bail!("expected single response tuple, got `{:?}`", other),
        };
        let key = match &tuple.key {
            Key::Metadata(MetadataKey::Replication { key }) => key.clone(),
            other => bail!("expected replication metadata key, got {:?}", other),
        };

        match tuple.error {
            None => {
                let payload = tuple
                    .payload
                    .as_ref()
                    .ok_or_else(|| anyhow!("tuple payload is None in replication response"))?;
                let lww_value: crate::lattice::LastWriterWinsLattice<Vec<u8>> =
                    serde_json::from_slice(payload)
                        .context("failed to decode replication response payload")?;

                let rep_data: ReplicationFactor =
                    serde_json::from_slice(lww_value.reveal().value().as_slice())
                        .context("failed to decode replication factor")?;

                let entry = self.key_replication_map.entry(key.clone()).or_default();
                for global in &rep_data.global {
                    entry.global_replication.insert(global.tier, global.value);
                }
                for local in &rep_data.local {
                    entry.local_replication.insert(local.tier, local.value);
                }
            }
            Some(MeldError::KeyDoesNotExist) => {
                // KEY_DNE means that the receiving thread was responsible for the metadata
                // but didn't have any values stored -- we use the default rep factor
                self.init_replication(key.clone());
            }
            Some(MeldError::WrongThread) => {
                // this means that the node that received the rep factor request was not
                // responsible for that metadata
                self.issue_replication_factor_request(key).await?;
                return Ok(());
            }
            error => {
                // the dependent pending entries stay unanswered; clients are
                // expected to retry
                log::error!(
                    "Unexpected error type {:?} in replication factor response.",
                    error
                );
                return Ok(());
            }
        }

        let key = Key::from(key);

        if self.pending_requests.contains_key(&key) {
            let threads = self.placement.responsible_threads(
                &key,
                &self.key_replication_map,
                &[self.config_data.self_tier],
            )?;

            if let Some(threads) = threads {
                let responsible = threads.contains(&self.wt);

                for request in self.pending_requests.remove(&key).unwrap_or_default() {
                    let now = Instant::now();

                    if let Some(request_addr) = &request.addr {
                        let mut response = request.new_response();

                        if responsible {
                            let mut tp = ResponseTuple {
                                key: key.clone(),
                                lattice_type: None,
                                payload: None,
                                error: None,
                                invalidate: false,
                            };

                            if request.ty == ResponseType::Get {
                                match self.process_get(&key) {
                                    Ok((lattice_type, payload)) => {
                                        tp.lattice_type = Some(lattice_type);
                                        tp.payload = Some(payload);
                                    }
                                    Err(err) => tp.error = Some(err),
                                }
                            } else {
                                match (request.lattice_type, request.payload) {
                                    (Some(lattice_type), Some(payload)) => {
                                        if self.lattice_type_conflict(&key, lattice_type) {
                                            log::error!(
                                                "lattice type mismatch for pending key {}",
                                                key
                                            );
                                            tp.error = Some(MeldError::Lattice);
                                        } else {
                                            match self.process_put(&key, lattice_type, &payload) {
                                                Ok(_) => {
                                                    tp.lattice_type = Some(lattice_type);
                                                    self.local_changeset.insert(key.clone());
                                                }
                                                Err(err) => tp.error = Some(err),
                                            }
                                        }
                                    }
                                    _ => {
                                        log::error!("PUT request is missing lattice value");
                                        tp.error = Some(MeldError::Lattice);
                                    }
                                }
                            }
                            response.tuples.push(tp);

                            self.report_data.record_key_access(&key, now);
                        } else {
                            let tp = ResponseTuple {
                                key: key.clone(),
                                lattice_type: None,
                                payload: None,
                                error: Some(MeldError::WrongThread),
                                invalidate: false,
                            };
                            response.tuples.push(tp);
                        }

                        self.send_response(request_addr, &response).await?;
                    } else if responsible {
                        // only gossip-originated PUTs fall into this category
                        if request.ty == ResponseType::Put {
                            match (request.lattice_type, request.payload) {
                                (Some(lattice_type), Some(payload)) => {
                                    if self.lattice_type_conflict(&key, lattice_type) {
                                        log::error!(
                                            "lattice type mismatch for pending key {}",
                                            key
                                        );
                                    } else if let Err(err) =
                                        self.process_put(&key, lattice_type, &payload)
                                    {
                                        log::error!(
                                            "failed to store pending key {}: {}",
                                            key,
                                            err
                                        );
                                    } else {
                                        self.report_data.record_key_access(&key, now);
                                        self.local_changeset.insert(key.clone());
                                    }
                                }
                                _ => log::error!("PUT request is missing lattice value"),
                            }
                        } else {
                            log::error!("Received a GET request with no response address.");
                        }
                    }
                }
            } else {
                log::error!("Missing key replication factor in process pending request routine.");
            }

            self.pending_requests.remove(&key);
        }

        if self.pending_gossip.contains_key(&key) {
            let threads = self.placement.responsible_threads(
                &key,
                &self.key_replication_map,
                &[self.config_data.self_tier],
            )?;

            if let Some(threads) = threads {
                if threads.contains(&self.wt) {
                    for gossip in self.pending_gossip.remove(&key).unwrap_or_default() {
                        if self.lattice_type_conflict(&key, gossip.lattice_type) {
                            log::error!("lattice type mismatch for pending key {}", key);
                        } else if let Err(err) =
                            self.process_put(&key, gossip.lattice_type, &gossip.payload)
                        {
                            log::error!("failed to merge pending gossip for {}: {}", key, err);
                        }
                    }
                } else {
                    let mut gossip_map: HashMap<String, Vec<PutTuple>> = HashMap::new();

                    // forward the gossip to the responsible threads, batched
                    // into one message per peer
                    let pending = self.pending_gossip.remove(&key).unwrap_or_default();
                    for thread in &threads {
                        let entry = gossip_map
                            .entry(thread.gossip_topic(&self.zenoh_prefix))
                            .or_default();

                        for gossip in &pending {
                            entry.push(PutTuple {
                                key: key.clone(),
                                lattice_type: gossip.lattice_type,
                                payload: gossip.payload.clone(),
                            });
                        }
                    }

                    for (address, tuples) in gossip_map {
                        let key_request = Request {
                            request: RequestData::Put { tuples },
                            response_address: Default::default(),
                            request_id: Default::default(),
                            address_cache_size: Default::default(),
                        };
                        let serialized = serde_json::to_string(&key_request)
                            .context("failed to serialize key request")?;
                        self.zenoh
                            .put(&address, serialized)
                            .await
                            .map_err(|e| eyre::eyre!(e))?;
                    }
                }
            } else {
                log::error!("Missing key replication factor in process pending gossip routine.");
            }

            self.pending_gossip.remove(&key);
        }

        let time_elapsed = Instant::now() - work_start;
        self.report_data.record_working_time(time_elapsed, 5);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use zenoh::prelude::{Receiver, ZFuture};

    use crate::{
        lattice::{last_writer_wins::Timestamp, LastWriterWinsLattice},
        messages::{
            replication_factor::{ReplicationFactor, ReplicationValue},
            request::RequestData,
            response::{ResponseTuple, ResponseType},
            Request, Response, Tier,
        },
        metadata::MetadataKey,
        nodes::storage::storage_test_instance,
        topics::ClientThread,
        zenoh_test_instance, ClientKey, Key, MeldError, ZenohValueAsString,
    };
    use std::time::Duration;

    fn replication_response(key: ClientKey, error: Option<MeldError>) -> Response {
        let payload = error.is_none().then(|| {
            let factor = ReplicationFactor {
                key: key.clone(),
                global: vec![
                    ReplicationValue {
                        tier: Tier::Memory,
                        value: 2,
                    },
                    ReplicationValue {
                        tier: Tier::Disk,
                        value: 1,
                    },
                ],
                local: vec![ReplicationValue {
                    tier: Tier::Memory,
                    value: 3,
                }],
            };
            let lww = LastWriterWinsLattice::from_pair(
                Timestamp::from_micros(1),
                serde_json::to_vec(&factor).unwrap(),
            );
            serde_json::to_vec(&lww).unwrap()
        });

        Response {
            response_id: None,
            ty: ResponseType::Get,
            error: Ok(()),
            tuples: vec![ResponseTuple {
                key: MetadataKey::Replication { key }.into(),
                lattice_type: payload.as_ref().map(|_| crate::LatticeType::Lww),
                payload,
                error,
                invalidate: false,
            }],
        }
    }

    #[test]
    fn fetched_factors_are_applied() {
        let zenoh = zenoh_test_instance();
        let zenoh_prefix = uuid::Uuid::new_v4().to_string();
        let mut server = storage_test_instance(zenoh, zenoh_prefix);

        let key: ClientKey = "key".into();
        let response = replication_response(key.clone(), None);
        smol::block_on(server.replication_response_handler(response)).unwrap();

        let replication = &server.key_replication_map[&key];
        assert_eq!(replication.global_replication[&Tier::Memory], 2);
        assert_eq!(replication.global_replication[&Tier::Disk], 1);
        assert_eq!(replication.local_replication[&Tier::Memory], 3);
    }

    #[test]
    fn key_dne_installs_defaults() {
        let zenoh = zenoh_test_instance();
        let zenoh_prefix = uuid::Uuid::new_v4().to_string();
        let mut server = storage_test_instance(zenoh, zenoh_prefix);

        let key: ClientKey = "key".into();
        let response = replication_response(key.clone(), Some(MeldError::KeyDoesNotExist));
        smol::block_on(server.replication_response_handler(response)).unwrap();

        let replication = &server.key_replication_map[&key];
        assert_eq!(replication.global_replication[&Tier::Memory], 1);
        assert_eq!(replication.local_replication[&Tier::Memory], 1);
    }

    #[test]
    fn pending_get_is_serviced_after_resolution() {
        let zenoh = zenoh_test_instance();
        let zenoh_prefix = uuid::Uuid::new_v4().to_string();
        let mut server = storage_test_instance(zenoh.clone(), zenoh_prefix.clone());

        let response_topic = ClientThread::new(server.node_id.clone(), 0)
            .response_topic(&zenoh_prefix);
        let mut subscriber = zenoh.subscribe(&response_topic).wait().unwrap();

        // a GET arrives before the replication factors are known
        let key: ClientKey = "key".into();
        let get_request = Request {
            request: RequestData::Get {
                keys: vec![key.clone().into()],
            },
            response_address: Some(response_topic.clone()),
            request_id: Some("pending_get".to_owned()),
            address_cache_size: Default::default(),
        };
        smol::block_on(server.request_handler(get_request)).unwrap();
        assert_eq!(server.pending_requests.len(), 1);

        // no response was produced yet
        assert!(subscriber
            .receiver()
            .recv_timeout(Duration::from_millis(100))
            .is_err());

        // the metadata response arrives and the pending GET is drained
        let response = replication_response(key.clone(), None);
        smol::block_on(server.replication_response_handler(response)).unwrap();

        assert_eq!(server.pending_requests.len(), 0);

        let message = subscriber
            .receiver()
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        let response: Response = serde_json::from_str(&message.value.as_string().unwrap()).unwrap();
        assert_eq!(response.response_id.as_deref(), Some("pending_get"));
        assert_eq!(response.tuples.len(), 1);
        // nothing was ever stored under the key
        assert_eq!(response.tuples[0].error, Some(MeldError::KeyDoesNotExist));
    }

    #[test]
    fn pending_put_is_applied_exactly_once_after_resolution() {
        let zenoh = zenoh_test_instance();
        let zenoh_prefix = uuid::Uuid::new_v4().to_string();
        let mut server = storage_test_instance(zenoh.clone(), zenoh_prefix.clone());

        let response_topic = ClientThread::new(server.node_id.clone(), 0)
            .response_topic(&zenoh_prefix);
        let mut subscriber = zenoh.subscribe(&response_topic).wait().unwrap();

        let key: ClientKey = "key".into();
        let value = LastWriterWinsLattice::from_pair(Timestamp::from_micros(7), b"v".to_vec());
        let put_request = Request {
            request: RequestData::Put {
                tuples: vec![crate::messages::request::PutTuple {
                    key: key.clone().into(),
                    lattice_type: crate::LatticeType::Lww,
                    payload: serde_json::to_vec(&value).unwrap(),
                }],
            },
            response_address: Some(response_topic.clone()),
            request_id: Some("pending_put".to_owned()),
            address_cache_size: Default::default(),
        };
        smol::block_on(server.request_handler(put_request)).unwrap();

        // deferred: nothing stored yet
        assert!(server.key_properties.is_empty());

        let response = replication_response(key.clone(), None);
        smol::block_on(server.replication_response_handler(response)).unwrap();

        // the pending PUT was applied and answered
        let stored_key = Key::from(key);
        assert!(server.key_properties.contains_key(&stored_key));
        assert!(server.local_changeset.contains(&stored_key));
        assert_eq!(server.pending_requests.len(), 0);

        let message = subscriber
            .receiver()
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        let response: Response = serde_json::from_str(&message.value.as_string().unwrap()).unwrap();
        assert_eq!(response.response_id.as_deref(), Some("pending_put"));
        assert_eq!(response.tuples[0].error, None);
    }

    #[test]
    fn pending_gossip_is_merged_after_resolution() {
        let zenoh = zenoh_test_instance();
        let zenoh_prefix = uuid::Uuid::new_v4().to_string();
        let mut server = storage_test_instance(zenoh, zenoh_prefix);

        let key: ClientKey = "key".into();
        let value = LastWriterWinsLattice::from_pair(Timestamp::from_micros(7), b"v".to_vec());
        let gossip = Request {
            request: RequestData::Put {
                tuples: vec![crate::messages::request::PutTuple {
                    key: key.clone().into(),
                    lattice_type: crate::LatticeType::Lww,
                    payload: serde_json::to_vec(&value).unwrap(),
                }],
            },
            response_address: None,
            request_id: None,
            address_cache_size: Default::default(),
        };
        smol::block_on(server.gossip_handler(&serde_json::to_string(&gossip).unwrap())).unwrap();
        assert_eq!(server.pending_gossip.len(), 1);

        let response = replication_response(key.clone(), None);
        smol::block_on(server.replication_response_handler(response)).unwrap();

        assert_eq!(server.pending_gossip.len(), 0);
        let stored_key = Key::from(key);
        assert!(server.key_properties.contains_key(&stored_key));
    }

    #[test]
    fn unexpected_error_abandons_pending_entries() {
        let zenoh = zenoh_test_instance();
        let zenoh_prefix = uuid::Uuid::new_v4().to_string();
        let mut server = storage_test_instance(zenoh, zenoh_prefix);

        let key: ClientKey = "key".into();
        let get_request = Request {
            request: RequestData::Get {
                keys: vec![key.clone().into()],
            },
            response_address: Some("some/topic".to_owned()),
            request_id: None,
            address_cache_size: Default::default(),
        };
        smol::block_on(server.request_handler(get_request)).unwrap();
        assert_eq!(server.pending_requests.len(), 1);

        let response = replication_response(key.clone(), Some(MeldError::Timeout));
        smol::block_on(server.replication_response_handler(response)).unwrap();

        // no replication entry was installed and the pending entry is orphaned
        assert!(!server.key_replication_map.contains_key(&key));
        assert_eq!(server.pending_requests.len(), 1);
    }
}
