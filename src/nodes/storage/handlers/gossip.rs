use crate::{
    messages::{
        request::{PutTuple, RequestData},
        Request,
    },
    nodes::storage::{PendingGossip, StorageNode},
    placement::PlacementOracle,
    Key,
};
use eyre::{bail, Context};
use std::{collections::HashMap, time::Instant};

impl<P: PlacementOracle> StorageNode<P> {
    /// Handles incoming gossip messages.
    ///
    /// Gossip has the shape of a PUT request without a response address: each
    /// tuple is merged into the local store if this thread is responsible for
    /// its key, forwarded to the responsible threads if not, and buffered in
    /// the pending-gossip map while the key's replication factors are unknown.
    pub async fn gossip_handler(&mut self, serialized: &str) -> eyre::Result<()> {
        let work_start = Instant::now();

        let gossip: Request =
            serde_json::from_str(serialized).context("failed to decode key request")?;
        let mut gossip_map: HashMap<String, Vec<PutTuple>> = HashMap::new();

        let tuples = match gossip.request {
            RequestData::Put { tuples } => tuples,
            RequestData::Get { .. } => {
                bail!("received gossip request with request type Get")
            }
        };

        for tuple in tuples {
            // first check if this thread is responsible for the key
            let key = tuple.key.clone();
            let threads = self.placement.responsible_threads(
                &key,
                &self.key_replication_map,
                &[self.config_data.self_tier],
            )?;

            match threads {
                Some(threads) if threads.contains(&self.wt) => {
                    if self.lattice_type_conflict(&key, tuple.lattice_type) {
                        log::error!(
                            "lattice type mismatch for key {}: gossip is {:?} but we expect {:?}",
                            key,
                            tuple.lattice_type,
                            self.key_properties[&key].lattice_type,
                        );
                    } else if let Err(err) =
                        self.process_put(&key, tuple.lattice_type, &tuple.payload)
                    {
                        log::error!("failed to merge gossip for key {}: {}", key, err);
                    }
                }
                Some(threads) => match &key {
                    Key::Metadata(_) => {
                        // forward the gossip
                        for thread in threads {
                            gossip_map
                                .entry(thread.gossip_topic(&self.zenoh_prefix))
                                .or_default()
                                .push(tuple.clone());
                        }
                    }
                    Key::Client(client_key) => {
                        // our replication info may be stale; refresh it and
                        // buffer the gossip until it is resolved
                        self.issue_replication_factor_request(client_key.clone())
                            .await?;

                        self.pending_gossip
                            .entry(key)
                            .or_default()
                            .push(PendingGossip {
                                lattice_type: tuple.lattice_type,
                                payload: tuple.payload,
                            });
                    }
                },
                None => {
                    if let Key::Client(client_key) = &key {
                        self.issue_replication_factor_request(client_key.clone())
                            .await?;
                    }

                    self.pending_gossip
                        .entry(key)
                        .or_default()
                        .push(PendingGossip {
                            lattice_type: tuple.lattice_type,
                            payload: tuple.payload,
                        });
                }
            }
        }

        // redirect gossip
        for (address, tuples) in gossip_map {
            let key_request = Request {
                request: RequestData::Put { tuples },
                response_address: Default::default(),
                request_id: Default::default(),
                address_cache_size: Default::default(),
            };
            let serialized =
                serde_json::to_string(&key_request).context("failed to serialize key request")?;
            self.zenoh
                .put(&address, serialized)
                .await
                .map_err(|e| eyre::eyre!(e))?;
        }

        let time_elapsed = Instant::now() - work_start;
        self.report_data.record_working_time(time_elapsed, 4);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        lattice::{last_writer_wins::Timestamp, Lattice, LastWriterWinsLattice},
        nodes::storage::storage_test_instance,
        store::LatticeValue,
        zenoh_test_instance, ClientKey, LatticeType,
    };

    fn gossip_request(key: ClientKey, lattice_type: LatticeType, payload: Vec<u8>) -> String {
        let request = Request {
            request: RequestData::Put {
                tuples: vec![PutTuple {
                    key: key.into(),
                    lattice_type,
                    payload,
                }],
            },
            response_address: None,
            request_id: None,
            address_cache_size: Default::default(),
        };

        serde_json::to_string(&request).expect("failed to serialize key request")
    }

    #[test]
    fn simple_gossip_receive() {
        let zenoh = zenoh_test_instance();
        let zenoh_prefix = uuid::Uuid::new_v4().to_string();

        let key: ClientKey = "key".into();
        let value =
            LastWriterWinsLattice::from_pair(Timestamp::from_micros(1), b"value".to_vec());

        let mut server = storage_test_instance(zenoh, zenoh_prefix);
        server.key_replication_map.entry(key.clone()).or_default();

        assert_eq!(server.local_changeset.len(), 0);

        let gossip = gossip_request(
            key.clone(),
            LatticeType::Lww,
            serde_json::to_vec(&value).unwrap(),
        );
        smol::block_on(server.gossip_handler(&gossip)).unwrap();

        assert_eq!(server.pending_gossip.len(), 0);
        // gossip does not go back into the local changeset
        assert_eq!(server.local_changeset.len(), 0);

        let store = server.store.borrow();
        let lattice = store
            .get(&Key::from(key))
            .unwrap()
            .as_lww()
            .unwrap();
        assert_eq!(lattice.reveal().value(), &b"value".to_vec());
    }

    #[test]
    fn gossip_merges_into_stored_value() {
        let zenoh = zenoh_test_instance();
        let zenoh_prefix = uuid::Uuid::new_v4().to_string();

        let key: ClientKey = "key".into();
        let mut server = storage_test_instance(zenoh.clone(), zenoh_prefix.clone());
        server.key_replication_map.entry(key.clone()).or_default();

        let older = LastWriterWinsLattice::from_pair(Timestamp::from_micros(1), b"old".to_vec());
        server
            .store
            .borrow_mut()
            .put(key.clone().into(), LatticeValue::Lww(older))
            .unwrap();

        let newer = LastWriterWinsLattice::from_pair(Timestamp::from_micros(9), b"new".to_vec());
        let gossip = gossip_request(
            key.clone(),
            LatticeType::Lww,
            serde_json::to_vec(&newer).unwrap(),
        );
        smol::block_on(server.gossip_handler(&gossip)).unwrap();

        assert_eq!(server.pending_gossip.len(), 0);
        let store = server.store.borrow();
        let lattice = store.get(&Key::from(key)).unwrap().as_lww().unwrap();
        assert_eq!(lattice.reveal().value(), &b"new".to_vec());
    }

    #[test]
    fn gossip_for_unknown_replication_is_buffered() {
        let zenoh = zenoh_test_instance();
        let zenoh_prefix = uuid::Uuid::new_v4().to_string();

        let key: ClientKey = "key".into();
        let mut server = storage_test_instance(zenoh, zenoh_prefix);

        let value = LastWriterWinsLattice::from_pair(Timestamp::from_micros(1), b"v".to_vec());
        let gossip = gossip_request(
            key.clone(),
            LatticeType::Lww,
            serde_json::to_vec(&value).unwrap(),
        );
        smol::block_on(server.gossip_handler(&gossip)).unwrap();

        // nothing stored yet, the tuple waits for the replication factors
        assert_eq!(server.pending_gossip.len(), 1);
        assert!(server.pending_gossip.contains_key(&Key::from(key)));
        assert!(server.key_properties.is_empty());
    }
}
