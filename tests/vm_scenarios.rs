//! End-to-end scenarios over a small synthetic V3 story.
//!
//! The fixture puts the object table at 0x10A with seven objects (a named
//! room, a box holding a key, and filler), globals at 0x300, a two-word
//! dictionary in static memory at 0x4EB, and code in high memory at
//! 0x510.

use brasslantern::config::InterpreterConfig;
use brasslantern::error::Error;
use brasslantern::interpreter::{Interpreter, MachineState};
use brasslantern::machine::Machine;
use brasslantern::memory::Memory;
use brasslantern::saveformat::QuetzalFormat;
use brasslantern::screen::CaptureScreen;
use brasslantern::storage::InMemoryStorage;
use brasslantern::text;
use brasslantern::util::to_i16;

const STATIC_BASE: usize = 0x4EB;
const HIGH_BASE: usize = 0x510;
const OBJECT_TABLE: usize = 0x10A;
const GLOBALS: usize = 0x300;
const DICTIONARY: usize = 0x4EB;
const CODE: usize = 0x510;

const ROOM: u16 = 5;
const SMALL_BOX: u16 = 6;
const KEY: u16 = 7;

fn put_word(bytes: &mut [u8], addr: usize, value: u16) {
    bytes[addr..addr + 2].copy_from_slice(&value.to_be_bytes());
}

/// Assemble the fixture with `code` at the initial PC.
fn build_story(code: &[u8]) -> Vec<u8> {
    let mut bytes = vec![0u8; 0x1000];
    bytes[0x00] = 3; // version
    put_word(&mut bytes, 0x04, HIGH_BASE as u16);
    put_word(&mut bytes, 0x06, CODE as u16);
    put_word(&mut bytes, 0x08, DICTIONARY as u16);
    put_word(&mut bytes, 0x0A, OBJECT_TABLE as u16);
    put_word(&mut bytes, 0x0C, GLOBALS as u16);
    put_word(&mut bytes, 0x0E, STATIC_BASE as u16);
    bytes[0x12..0x18].copy_from_slice(b"260801");

    // Object table: 31 default words, then 9-byte entries.
    let tree = OBJECT_TABLE + 31 * 2;
    let entry = |n: u16| tree + (n as usize - 1) * 9;
    let prop_table = |n: u16| 0x190 + (n as usize - 1) * 0x10;

    for obj in 1..=7u16 {
        put_word(&mut bytes, entry(obj) + 7, prop_table(obj) as u16);
        // Minimal property table: unnamed, no properties.
        bytes[prop_table(obj)] = 0;
    }

    // Object 5, the room: attribute 0, name "Test Room", child = box.
    bytes[entry(ROOM)] = 0x80;
    bytes[entry(ROOM) + 6] = SMALL_BOX as u8;
    let name = prop_table(ROOM);
    bytes[name] = 4; // four words of short name
    let zchars: [u8; 12] = [4, 25, 10, 24, 25, 0, 4, 23, 20, 20, 18, 5];
    for (i, chunk) in zchars.chunks(3).enumerate() {
        let mut word =
            ((chunk[0] as u16) << 10) | ((chunk[1] as u16) << 5) | chunk[2] as u16;
        if i == 3 {
            word |= 0x8000;
        }
        put_word(&mut bytes, name + 1 + i * 2, word);
    }
    bytes[name + 9] = 0; // property terminator

    // Object 6, the box: attributes 1 and 2, inside the room, holds the key.
    bytes[entry(SMALL_BOX)] = 0x60;
    bytes[entry(SMALL_BOX) + 4] = ROOM as u8;
    bytes[entry(SMALL_BOX) + 6] = KEY as u8;

    // Object 7, the key: inside the box.
    bytes[entry(KEY) + 4] = SMALL_BOX as u8;

    // Dictionary: separators '.' and ',', entry length 7, two entries.
    bytes[DICTIONARY] = 2;
    bytes[DICTIONARY + 1] = b'.';
    bytes[DICTIONARY + 2] = b',';
    bytes[DICTIONARY + 3] = 7;
    put_word(&mut bytes, DICTIONARY + 4, 2);
    {
        let probe = Memory::from_story(bytes.clone()).unwrap();
        let mut words: Vec<Vec<u16>> = ["go", "look"]
            .iter()
            .map(|w| text::encode_word(&probe, w))
            .collect();
        words.sort();
        for (i, w) in words.iter().enumerate() {
            let addr = DICTIONARY + 6 + i * 7;
            put_word(&mut bytes, addr, w[0]);
            put_word(&mut bytes, addr + 2, w[1]);
        }
    }

    bytes[CODE..CODE + code.len()].copy_from_slice(code);

    // Stamp the verify checksum last.
    let sum = bytes[0x40..]
        .iter()
        .fold(0u16, |s, &b| s.wrapping_add(b as u16));
    put_word(&mut bytes, 0x1C, sum);
    bytes
}

fn machine(code: &[u8]) -> Machine {
    let memory = Memory::from_story(build_story(code)).unwrap();
    Machine::new(memory).unwrap()
}

fn interpreter(code: &[u8]) -> (Interpreter, CaptureScreen) {
    let screen = CaptureScreen::new();
    let interp = Interpreter::new(
        machine(code),
        Box::new(screen.clone()),
        Box::new(InMemoryStorage::new()),
        Box::new(QuetzalFormat),
        InterpreterConfig::default(),
    );
    (interp, screen)
}

#[test]
fn object_fixture_decodes_as_expected() {
    let m = machine(&[0xBA]);
    let objects = &m.objects;
    let memory = &m.memory;

    assert_eq!(objects.object_count(), 7);
    assert!(objects.has_attr(memory, ROOM, 0).unwrap());
    assert!(!objects.has_attr(memory, ROOM, 1).unwrap());
    assert!(objects.has_attr(memory, SMALL_BOX, 1).unwrap());
    assert!(objects.has_attr(memory, SMALL_BOX, 2).unwrap());
    assert_eq!(objects.parent(memory, KEY).unwrap(), SMALL_BOX);
    assert_eq!(objects.child(memory, SMALL_BOX).unwrap(), KEY);
    assert_eq!(objects.parent(memory, SMALL_BOX).unwrap(), ROOM);
    assert_eq!(objects.name(memory, ROOM).unwrap(), "Test Room");
}

#[test]
fn memory_protection_boundary() {
    let mut m = machine(&[0xBA]);
    m.memory.set_byte(0x100, 0x42).unwrap();
    assert_eq!(m.memory.get_byte(0x100).unwrap(), 0x42);
    assert!(matches!(
        m.memory.set_byte(STATIC_BASE, 0x42),
        Err(Error::Protection(_))
    ));
}

#[test]
fn arithmetic_wrap_scenario() {
    // add #7fff #0002 -> G16 ; quit
    let (mut i, _) = interpreter(&[0xD4, 0x1F, 0x7F, 0xFF, 0x02, 0x10, 0xBA]);
    assert_eq!(i.run().unwrap(), MachineState::Halted);
    let stored = i.machine.read_global(16).unwrap();
    assert_eq!(stored, 0x8001);
    assert_eq!(to_i16(stored), -32767);
}

#[test]
fn division_truncation_scenario() {
    // div #-11 #2 -> G16 ; quit
    let (mut i, _) = interpreter(&[0xD7, 0x1F, 0xFF, 0xF5, 0x02, 0x10, 0xBA]);
    i.run().unwrap();
    assert_eq!(to_i16(i.machine.read_global(16).unwrap()), -5);
}

#[test]
fn indirect_stack_increment_scenario() {
    // push #05 ; inc_chk (G17=0 -> stack top) #05 [TRUE -> quit] ;
    // new_line ; quit
    let (mut i, _) = interpreter(&[
        0xE8, 0x7F, 0x05, // push
        0x45, 0x11, 0x05, 0xC3, // inc_chk V11 #05
        0xBB, 0xBA,
    ]);
    assert_eq!(i.run().unwrap(), MachineState::Halted);
    // Branch taken (6 > 5), and the slot was modified in place.
    assert_eq!(i.machine.stack, vec![6]);
    assert_eq!(i.machine.pc, CODE + 9); // stopped on quit
}

#[test]
fn verify_passes_on_stamped_checksum() {
    // verify [TRUE -> quit] ; new_line ; quit
    let (mut i, screen) = interpreter(&[0xBD, 0xC3, 0xBB, 0xBA]);
    assert_eq!(i.run().unwrap(), MachineState::Halted);
    // The new_line was skipped, so nothing was printed.
    assert_eq!(screen.output(), "");
}

#[test]
fn read_line_tokenises_against_fixture_dictionary() {
    // sread text=0x400 parse=0x440 ; quit
    let (mut i, _) = interpreter(&[0xE4, 0x0F, 0x04, 0x00, 0x04, 0x40, 0xBA]);
    i.machine.memory.set_byte(0x400, 30).unwrap();
    i.machine.memory.set_byte(0x440, 8).unwrap();

    let MachineState::AwaitingInput(_) = i.run().unwrap() else {
        panic!("read did not suspend");
    };
    i.resume_with_input("look, go").unwrap();
    assert_eq!(i.run().unwrap(), MachineState::Halted);

    // Three tokens: "look", ",", "go"; the separator misses the
    // dictionary.
    assert_eq!(i.machine.memory.get_byte(0x441).unwrap(), 3);
    assert_ne!(i.machine.memory.get_word(0x442).unwrap(), 0); // look
    assert_eq!(i.machine.memory.get_word(0x446).unwrap(), 0); // ,
    assert_ne!(i.machine.memory.get_word(0x44A).unwrap(), 0); // go
}

/// Scenario 6: mutate state, save mid-flight, keep going, restart, then
/// restore and confirm execution resumes on the save's success path with
/// the saved state intact.
#[test]
fn quetzal_save_restart_restore_round_trip() {
    // 0x510: add #7fff #0002 -> G16
    // 0x516: push #0005
    // 0x519: save [TRUE -> 0x520]
    // 0x51B: quit                      (save-failure path)
    // 0x520: store G17 #01 ; quit      (success / restored path)
    // 0x530: restore [TRUE +2] ; quit  (entered by hand below)
    let mut code = vec![0u8; 0x40];
    code[0x00..0x06].copy_from_slice(&[0xD4, 0x1F, 0x7F, 0xFF, 0x02, 0x10]);
    code[0x06..0x09].copy_from_slice(&[0xE8, 0x7F, 0x05]);
    code[0x09..0x0B].copy_from_slice(&[0xB5, 0xC7]);
    code[0x0B] = 0xBA;
    code[0x10..0x13].copy_from_slice(&[0x0D, 0x11, 0x01]);
    code[0x13] = 0xBA;
    code[0x20..0x22].copy_from_slice(&[0xB6, 0xC2]);
    code[0x22] = 0xBA;

    let (mut i, _) = interpreter(&code);
    assert_eq!(i.run().unwrap(), MachineState::Halted);

    // Save succeeded: the branch to the success path ran the store.
    assert_eq!(i.machine.read_global(16).unwrap(), 0x8001);
    assert_eq!(i.machine.read_global(17).unwrap(), 1);
    assert_eq!(i.machine.stack, vec![5]);

    // Wipe everything.
    i.machine.restart().unwrap();
    assert_eq!(i.machine.read_global(16).unwrap(), 0);
    assert!(i.machine.stack.is_empty());

    // Execute the restore instruction.
    i.machine.pc = CODE + 0x20;
    assert_eq!(i.run().unwrap(), MachineState::Halted);

    // Back on the success path with the saved state: globals, stack and
    // the re-run store all in place.
    assert_eq!(i.machine.read_global(16).unwrap(), 0x8001);
    assert_eq!(i.machine.read_global(17).unwrap(), 1);
    assert_eq!(i.machine.stack, vec![5]);
}

#[test]
fn status_line_reports_fixture_room() {
    // sread with the room in G0 and score/moves set.
    let (mut i, screen) = interpreter(&[0xE4, 0x0F, 0x04, 0x00, 0x04, 0x40, 0xBA]);
    i.machine.memory.set_byte(0x400, 30).unwrap();
    i.machine.memory.set_byte(0x440, 8).unwrap();
    i.machine.write_global(16, ROOM).unwrap();
    i.machine.write_global(17, 10).unwrap();
    i.machine.write_global(18, 3).unwrap();

    i.run().unwrap();
    let (location, score, moves, _) = screen.status_line().unwrap();
    assert_eq!(location, "Test Room");
    assert_eq!(score, 10);
    assert_eq!(moves, 3);
}
