//! In-memory state container for one open word book.
//!
//! A single writer drives every mutation through `&mut self`, and each method
//! finishes with the pointer already re-clamped against the post-mutation
//! view. Listeners registered with [`WordBookState::subscribe`] hear about
//! every change after it has been applied.

use crate::model::{Word, WordBook, WordDraft, next_timestamp, now_millis};
use crate::search::WordIndex;
use once_cell::sync::OnceCell;
use rand::{Rng, distributions::Alphanumeric, thread_rng};
use std::collections::HashSet;
use tracing::{debug, info};

const WORD_ID_LEN: usize = 21;
const DEFAULT_SEED: &[(&str, &str)] = &[
    ("fluster", "fluster detail example"),
    ("resolute", "resolute detail example"),
    ("cardigan", "cardigan detail example"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateEvent {
    Loaded,
    PointerMoved,
    FilterToggled,
    RemarkVisibilityToggled,
    WordSaved { id: String, created: bool },
    StarsChanged { id: String },
    BookmarkToggled { id: String },
    WordDeleted { id: String },
    Merged { added: usize },
    DirtyChanged(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Box<dyn FnMut(&StateEvent) + Send>;

pub struct WordBookState {
    book: WordBook,
    pointer: Option<usize>,
    filter_starred: bool,
    remark_visible: bool,
    dirty: bool,
    index: OnceCell<WordIndex>,
    listeners: Vec<(SubscriptionId, Listener)>,
    next_subscription: u64,
}

impl WordBookState {
    pub fn new(book: WordBook) -> Self {
        let pointer = if book.words.is_empty() { None } else { Some(0) };
        Self {
            book,
            pointer,
            filter_starred: false,
            remark_visible: true,
            dirty: false,
            index: OnceCell::new(),
            listeners: Vec::new(),
            next_subscription: 0,
        }
    }

    pub fn book(&self) -> &WordBook {
        &self.book
    }

    pub fn into_book(self) -> WordBook {
        self.book
    }

    pub fn pointer(&self) -> Option<usize> {
        self.pointer
    }

    pub fn filter_starred(&self) -> bool {
        self.filter_starred
    }

    pub fn remark_visible(&self) -> bool {
        self.remark_visible
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn subscribe<F>(&mut self, listener: F) -> SubscriptionId
    where
        F: FnMut(&StateEvent) + Send + 'static,
    {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(existing, _)| *existing != id);
        self.listeners.len() != before
    }

    /// The words visible under the current filter, in book order.
    pub fn current_word_list(&self) -> Vec<&Word> {
        self.book
            .words
            .iter()
            .filter(|word| !self.filter_starred || word.starred)
            .collect()
    }

    pub fn current_word_count(&self) -> usize {
        if self.filter_starred {
            self.book.words.iter().filter(|word| word.starred).count()
        } else {
            self.book.words.len()
        }
    }

    pub fn current_word(&self) -> Option<&Word> {
        let pointer = self.pointer?;
        self.current_word_list().get(pointer).copied()
    }

    pub fn set_pointer(&mut self, target: i64) {
        self.pointer = clamp_pointer(target, self.current_word_count());
        self.emit(StateEvent::PointerMoved);
    }

    /// Moves the pointer by `delta`; `i64::MIN`/`i64::MAX` jump to either end.
    pub fn offset_pointer(&mut self, delta: i64) {
        let base = self.pointer.map(|p| p as i64).unwrap_or(0);
        self.set_pointer(base.saturating_add(delta));
    }

    pub fn toggle_filter_starred(&mut self) {
        self.filter_starred = !self.filter_starred;
        self.pointer = clamp_pointer(0, self.current_word_count());
        self.emit(StateEvent::FilterToggled);
    }

    pub fn toggle_remark_visible(&mut self) {
        self.remark_visible = !self.remark_visible;
        self.emit(StateEvent::RemarkVisibilityToggled);
    }

    /// Points at the word named `name` if it is part of the current view.
    pub fn select_by_name(&mut self, name: &str) -> bool {
        let Some(position) = self
            .current_word_list()
            .iter()
            .position(|word| word.name == name)
        else {
            return false;
        };
        self.pointer = Some(position);
        self.emit(StateEvent::PointerMoved);
        true
    }

    /// Adds a word or updates the one with the same name.
    ///
    /// Blank names are ignored. Afterwards the pointer sits on the saved word
    /// when the current view shows it, otherwise it is re-clamped.
    pub fn save_word(&mut self, draft: WordDraft) -> Option<&Word> {
        let name = draft.name.trim();
        if name.is_empty() {
            return None;
        }

        let (position, created) = match self.book.position_by_name(name) {
            Some(position) => {
                let word = &mut self.book.words[position];
                let mut changed = false;
                for (field, value) in [
                    (&mut word.remark, draft.remark),
                    (&mut word.example, draft.example),
                    (&mut word.translation, draft.translation),
                ] {
                    if let Some(value) = value {
                        *field = value.trim().to_string();
                        changed = true;
                    }
                }
                if changed {
                    word.last_modified = next_timestamp(word.last_modified);
                }
                (position, false)
            }
            None => {
                let id = self.fresh_word_id();
                let mut word = Word::new(id, name, now_millis());
                word.remark = draft.remark.unwrap_or_default().trim().to_string();
                word.example = draft.example.unwrap_or_default().trim().to_string();
                word.translation = draft.translation.unwrap_or_default().trim().to_string();
                self.book.words.push(word);
                (self.book.words.len() - 1, true)
            }
        };

        let id = self.book.words[position].id.clone();
        self.pointer = match self.view_position_of(&id) {
            Some(view_position) => Some(view_position),
            None => self
                .pointer
                .and_then(|p| clamp_pointer(p as i64, self.current_word_count())),
        };
        debug!(word = %id, created, "saved word");
        self.touch();
        self.emit(StateEvent::WordSaved {
            id: id.clone(),
            created,
        });
        self.book.words.iter().find(|word| word.id == id)
    }

    pub fn set_current_word_stars(&mut self, stars: u8) {
        let Some(id) = self.current_word().map(|word| word.id.clone()) else {
            return;
        };
        if let Some(position) = self.book.position_by_id(&id) {
            self.book.words[position].set_stars(stars);
        }
        self.reclamp();
        self.touch();
        self.emit(StateEvent::StarsChanged { id });
    }

    pub fn delete_current_word(&mut self) {
        let Some(id) = self.current_word().map(|word| word.id.clone()) else {
            return;
        };
        if let Some(position) = self.book.position_by_id(&id) {
            self.book.words.remove(position);
        }
        self.reclamp();
        self.touch();
        self.emit(StateEvent::WordDeleted { id });
    }

    pub fn toggle_current_word_bookmarked(&mut self) {
        let Some(id) = self.current_word().map(|word| word.id.clone()) else {
            return;
        };
        if let Some(position) = self.book.position_by_id(&id) {
            let word = &mut self.book.words[position];
            word.bookmarked = !word.bookmarked;
        }
        self.touch();
        self.emit(StateEvent::BookmarkToggled { id });
    }

    /// Appends another book's words and rewinds to the first word.
    ///
    /// Names are not de-duplicated; colliding ids get fresh ones.
    pub fn merge(&mut self, words: Vec<Word>) {
        let added = words.len();
        let mut ids: HashSet<String> = self.book.words.iter().map(|w| w.id.clone()).collect();
        for mut word in words {
            if word.id.is_empty() || ids.contains(&word.id) {
                word.id = self.fresh_word_id();
            }
            ids.insert(word.id.clone());
            self.book.words.push(word);
        }
        self.pointer = clamp_pointer(0, self.current_word_count());
        info!(added, total = self.book.words.len(), "merged words");
        self.touch();
        self.emit(StateEvent::Merged { added });
    }

    /// Replaces the open book; the result is clean and pointed at its first word.
    pub fn load(&mut self, book: WordBook) {
        info!(book = %book.id, words = book.words.len(), "loaded word book");
        self.book = book;
        self.index = OnceCell::new();
        self.pointer = clamp_pointer(0, self.current_word_count());
        self.emit(StateEvent::Loaded);
        self.set_dirty(false);
    }

    /// Seeds a few sample words into an empty book.
    pub fn load_default(&mut self) {
        if !self.book.words.is_empty() {
            return;
        }
        for (name, remark) in DEFAULT_SEED {
            self.save_word(WordDraft::named(*name).remark(*remark));
        }
    }

    pub fn mark_clean(&mut self) {
        self.set_dirty(false);
    }

    /// Ranked search over the whole book (ignores the starred filter).
    pub fn search(&self, query: &str, limit: usize) -> Vec<&Word> {
        let index = self.index.get_or_init(|| WordIndex::build(&self.book.words));
        index
            .search(query, limit)
            .into_iter()
            .filter_map(|hit| self.book.words.get(hit.position))
            .collect()
    }

    fn view_position_of(&self, id: &str) -> Option<usize> {
        self.current_word_list()
            .iter()
            .position(|word| word.id == id)
    }

    fn reclamp(&mut self) {
        let len = self.current_word_count();
        self.pointer = clamp_pointer(self.pointer.map(|p| p as i64).unwrap_or(0), len);
    }

    fn touch(&mut self) {
        self.index = OnceCell::new();
        self.book.bump_version();
        self.set_dirty(true);
    }

    fn set_dirty(&mut self, dirty: bool) {
        if self.dirty != dirty {
            self.dirty = dirty;
            self.emit(StateEvent::DirtyChanged(dirty));
        }
    }

    fn fresh_word_id(&self) -> String {
        loop {
            let id: String = thread_rng()
                .sample_iter(&Alphanumeric)
                .take(WORD_ID_LEN)
                .map(char::from)
                .collect();
            if self.book.position_by_id(&id).is_none() {
                return id;
            }
        }
    }

    fn emit(&mut self, event: StateEvent) {
        for (_, listener) in &mut self.listeners {
            listener(&event);
        }
    }
}

fn clamp_pointer(target: i64, len: usize) -> Option<usize> {
    if len == 0 {
        return None;
    }
    Some(target.clamp(0, len as i64 - 1) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn book_of(names: &[(&str, u8)]) -> WordBook {
        let mut book = WordBook::empty("b", "Book");
        for (idx, (name, stars)) in names.iter().enumerate() {
            let mut word = Word::new(format!("w{idx}"), *name, 1);
            word.set_stars(*stars);
            book.words.push(word);
        }
        book
    }

    fn names(state: &WordBookState) -> Vec<&str> {
        state
            .current_word_list()
            .into_iter()
            .map(|w| w.name.as_str())
            .collect()
    }

    #[test]
    fn empty_book_has_no_current_word() {
        let mut state = WordBookState::new(WordBook::empty("b", "Book"));
        assert_eq!(state.pointer(), None);
        assert!(state.current_word().is_none());
        state.offset_pointer(1);
        state.toggle_filter_starred();
        assert!(state.current_word().is_none());
        state.delete_current_word();
        state.set_current_word_stars(2);
        state.toggle_current_word_bookmarked();
        assert!(!state.is_dirty());
    }

    #[test]
    fn pointer_is_clamped_and_sentinels_reach_the_ends() {
        let mut state = WordBookState::new(book_of(&[("a", 1), ("b", 0), ("c", 2)]));
        state.offset_pointer(i64::MAX);
        assert_eq!(state.current_word().unwrap().name, "c");
        state.offset_pointer(-100_000);
        assert_eq!(state.pointer(), Some(0));
        state.set_pointer(7);
        assert_eq!(state.pointer(), Some(2));
        state.set_pointer(-3);
        assert_eq!(state.pointer(), Some(0));
    }

    #[test]
    fn filter_toggle_resets_pointer_and_keeps_order() {
        let mut state = WordBookState::new(book_of(&[("a", 1), ("b", 0), ("c", 2)]));
        state.set_pointer(2);
        state.toggle_filter_starred();
        assert_eq!(state.pointer(), Some(0));
        assert_eq!(names(&state), vec!["a", "c"]);
        state.toggle_filter_starred();
        assert_eq!(names(&state), vec!["a", "b", "c"]);
    }

    #[test]
    fn pointer_stays_in_range_across_filter_sequences() {
        let mut state = WordBookState::new(book_of(&[("a", 0), ("b", 0), ("c", 1), ("d", 0)]));
        for step in 0..40i64 {
            match step % 5 {
                0 => state.toggle_filter_starred(),
                1 => state.offset_pointer(step),
                2 => state.set_current_word_stars((step % 3) as u8),
                3 => state.offset_pointer(-1),
                _ => state.set_pointer(step * 3),
            }
            let len = state.current_word_list().len();
            match state.pointer() {
                Some(p) => assert!(p < len),
                None => assert_eq!(len, 0),
            }
        }
    }

    #[test]
    fn blank_names_are_ignored() {
        let mut state = WordBookState::new(book_of(&[("a", 1)]));
        assert!(state.save_word(WordDraft::named("   ")).is_none());
        assert!(state.save_word(WordDraft::named("")).is_none());
        assert_eq!(state.book().words.len(), 1);
        assert!(!state.is_dirty());
    }

    #[test]
    fn saving_an_existing_name_updates_in_place() {
        let mut state = WordBookState::new(WordBook::empty("b", "Book"));
        state.save_word(WordDraft::named("X").remark("r1"));
        let first = state.book().words[0].clone();
        state.save_word(WordDraft::named("X").remark("r2").example("an x"));
        let words = &state.book().words;
        assert_eq!(words.len(), 1);
        assert_eq!(words[0].remark, "r2");
        assert_eq!(words[0].example, "an x");
        assert_eq!(words[0].id, first.id);
        assert!(words[0].last_modified > first.last_modified);
    }

    #[test]
    fn new_words_are_starred_appended_and_selected() {
        let mut state = WordBookState::new(book_of(&[("a", 0), ("b", 1)]));
        state.toggle_filter_starred();
        let saved = state.save_word(WordDraft::named("  zeal ")).unwrap().clone();
        assert_eq!(saved.name, "zeal");
        assert_eq!(saved.stars, 1);
        assert!(saved.starred);
        assert!(saved.created_on > 0);
        assert_eq!(state.book().words.last().unwrap().id, saved.id);
        assert_eq!(state.current_word().unwrap().id, saved.id);
        assert!(state.is_dirty());
    }

    #[test]
    fn deleting_last_word_clamps_pointer() {
        let mut state = WordBookState::new(book_of(&[("a", 1), ("b", 1), ("c", 1)]));
        state.set_pointer(2);
        let before = state.book().version;
        state.delete_current_word();
        assert_eq!(state.book().words.len(), 2);
        assert_eq!(state.pointer(), Some(1));
        assert!(state.book().version > before);
        assert!(state.is_dirty());
    }

    #[test]
    fn unstarring_last_filtered_word_reclamps() {
        let mut state = WordBookState::new(book_of(&[("a", 1), ("b", 0), ("c", 2)]));
        state.toggle_filter_starred();
        state.offset_pointer(i64::MAX);
        assert_eq!(state.current_word().unwrap().name, "c");
        state.set_current_word_stars(0);
        assert_eq!(names(&state), vec!["a"]);
        assert_eq!(state.pointer(), Some(0));
        state.set_current_word_stars(0);
        assert_eq!(state.pointer(), None);
        assert!(state.current_word().is_none());
        assert!(state.book().words.iter().all(|w| w.starred == (w.stars > 0)));
    }

    #[test]
    fn bookmark_toggle_flips_flag() {
        let mut state = WordBookState::new(book_of(&[("a", 1)]));
        state.toggle_current_word_bookmarked();
        assert!(state.current_word().unwrap().bookmarked);
        state.toggle_current_word_bookmarked();
        assert!(!state.current_word().unwrap().bookmarked);
        assert!(state.is_dirty());
    }

    #[test]
    fn merge_appends_everything_and_rewinds() {
        let mut state = WordBookState::new(book_of(&[("a", 1), ("b", 1)]));
        state.set_pointer(1);
        let other = book_of(&[("a", 0), ("z", 2)]);
        state.merge(other.words);
        assert_eq!(names(&state), vec!["a", "b", "a", "z"]);
        assert_eq!(state.pointer(), Some(0));
        let ids: HashSet<_> = state.book().words.iter().map(|w| w.id.clone()).collect();
        assert_eq!(ids.len(), 4);
    }

    #[test]
    fn load_replaces_book_and_clears_dirty() {
        let mut state = WordBookState::new(book_of(&[("a", 1)]));
        state.delete_current_word();
        assert!(state.is_dirty());
        state.load(book_of(&[("x", 0), ("y", 0)]));
        assert!(!state.is_dirty());
        assert_eq!(state.pointer(), Some(0));
        assert_eq!(state.current_word().unwrap().name, "x");
    }

    #[test]
    fn default_seed_only_fills_empty_books() {
        let mut state = WordBookState::new(WordBook::empty("b", "Book"));
        state.load_default();
        assert_eq!(names(&state), vec!["fluster", "resolute", "cardigan"]);
        state.load_default();
        assert_eq!(state.book().words.len(), 3);
    }

    #[test]
    fn search_reflects_latest_mutations() {
        let mut state = WordBookState::new(book_of(&[("fluster", 1)]));
        assert_eq!(state.search("resol", 10).len(), 0);
        state.save_word(WordDraft::named("resolute").remark("determined"));
        let hits = state.search("resol", 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "resolute");
    }

    #[test]
    fn listeners_see_changes_until_unsubscribed() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut state = WordBookState::new(book_of(&[("a", 1)]));
        let sink = Arc::clone(&seen);
        let id = state.subscribe(move |event| sink.lock().push(event.clone()));
        state.toggle_remark_visible();
        state.delete_current_word();
        assert!(state.unsubscribe(id));
        state.toggle_filter_starred();

        let events = seen.lock().clone();
        assert_eq!(
            events,
            vec![
                StateEvent::RemarkVisibilityToggled,
                StateEvent::DirtyChanged(true),
                StateEvent::WordDeleted { id: "w0".to_string() },
            ]
        );
    }

    #[test]
    fn select_by_name_respects_filter() {
        let mut state = WordBookState::new(book_of(&[("a", 1), ("b", 0)]));
        assert!(state.select_by_name("b"));
        assert_eq!(state.pointer(), Some(1));
        state.toggle_filter_starred();
        assert!(!state.select_by_name("b"));
    }
}
